//! Background readers that turn pipe readiness into ordered chunk events.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::{RunEvent, StreamKind};

/// Read buffer size for one readiness event.
pub const PUMP_BUFFER_SIZE: usize = 8 * 1024;

/// A reader attached to one end of a child's pipe.
///
/// Each successful read forwards exactly the bytes that were available as a
/// [`RunEvent::Chunk`]. When the pipe closes the pump sends
/// [`RunEvent::Closed`] and stops. Pumps own their pipe and cannot be
/// restarted; every run attaches new ones.
#[derive(Debug)]
pub struct StreamPump {
    stream: StreamKind,
    handle: JoinHandle<()>,
}

impl StreamPump {
    /// Start reading `reader` in a background task, reporting on `events`.
    pub fn attach<R>(stream: StreamKind, reader: R, events: UnboundedSender<RunEvent>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handle = tokio::spawn(pump(stream, reader, events));
        Self { stream, handle }
    }

    #[must_use]
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop reading. The pipe is dropped with the task; no `Closed` is sent.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the reader task to end.
    pub async fn join(self) {
        match self.handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                tracing::debug!(stream = %self.stream, "stream pump aborted");
            }
            Err(e) => {
                tracing::warn!(stream = %self.stream, error = %e, "stream pump task failed");
            }
        }
    }
}

async fn pump<R>(stream: StreamKind, mut reader: R, events: UnboundedSender<RunEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = RunEvent::Chunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if events.send(chunk).is_err() {
                    // Coordinator is gone; nobody is listening any more.
                    tracing::debug!(%stream, "run event channel closed, stopping pump");
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(error) => {
                tracing::warn!(%stream, error = %error, "failed reading child output");
                let _ = events.send(RunEvent::ReadFailed { stream, error });
                break;
            }
        }
    }

    tracing::trace!(%stream, "stream reached end of file");
    let _ = events.send(RunEvent::Closed { stream });
}
