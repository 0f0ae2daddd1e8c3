//! Per-stream output accumulation.

/// Append-only buffer holding everything one stream produced during a run.
///
/// Growth is unbounded. Only the run coordinator appends, and a sink is only
/// reset by the controller once the run that filled it has fully drained.
#[derive(Debug, Default, Clone)]
pub struct ByteSink {
    buf: Vec<u8>,
}

impl ByteSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Current contents.
    #[must_use]
    pub fn snapshot(&self) -> &[u8] {
        &self.buf
    }

    /// Clear the contents, keeping the allocation for the next run.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// The stdout and stderr sinks of one controller.
#[derive(Debug, Default)]
pub struct SinkPair {
    pub stdout: ByteSink,
    pub stderr: ByteSink,
}

impl SinkPair {
    pub fn reset(&mut self) {
        self.stdout.reset();
        self.stderr.reset();
    }
}
