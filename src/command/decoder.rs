//! Decoders from accumulated stdout bytes to typed responses.
//!
//! A decoder only ever sees the complete output of a finished run. It must
//! never panic on malformed input; anything it cannot interpret becomes
//! `None`.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

/// Turns the bytes a command wrote to stdout into a typed response.
pub trait ResponseDecoder: Send + Sync + 'static {
    /// The typed response produced on success.
    type Output: Send + 'static;

    /// Decode the full stdout of a run, or `None` if it is not understood.
    fn decode(&self, bytes: &[u8]) -> Option<Self::Output>;
}

impl<F, R> ResponseDecoder for F
where
    F: Fn(&[u8]) -> Option<R> + Send + Sync + 'static,
    R: Send + 'static,
{
    type Output = R;

    fn decode(&self, bytes: &[u8]) -> Option<R> {
        self(bytes)
    }
}

/// Hands back the raw bytes untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl ResponseDecoder for RawDecoder {
    type Output = Vec<u8>;

    fn decode(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        Some(bytes.to_vec())
    }
}

/// Interprets stdout as UTF-8 text. Empty output is no response.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl ResponseDecoder for TextDecoder {
    type Output = String;

    fn decode(&self, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() {
            return None;
        }
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }
}

/// Splits UTF-8 stdout into trimmed, non-empty lines. Empty output is no
/// response.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinesDecoder;

impl ResponseDecoder for LinesDecoder {
    type Output = Vec<String>;

    fn decode(&self, bytes: &[u8]) -> Option<Vec<String>> {
        if bytes.is_empty() {
            return None;
        }
        let text = std::str::from_utf8(bytes).ok()?;
        Some(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }
}

/// Parses stdout as a single JSON document.
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonDecoder")
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> ResponseDecoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn decode(&self, bytes: &[u8]) -> Option<T> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(error = %e, len = bytes.len(), "stdout is not valid JSON");
                None
            }
        }
    }
}
