//! Diagnostic-stream capture: drains a service's stderr into a rolling buffer
//! so failures can quote what the service said about itself.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Lines kept per service.
pub const DEFAULT_DIAGNOSTIC_LINES: usize = 100;

/// Characters of diagnostic text attached to an error.
const MAX_CONTEXT_CHARS: usize = 1024;

/// Rolling buffer of diagnostic lines.
pub struct DiagnosticBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticBuffer {
    /// Create a new buffer with the given line capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
        }
    }

    /// Push a new line, evicting the oldest if at capacity.
    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> &VecDeque<String> {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }

    /// The most recent diagnostic text, at most [`MAX_CONTEXT_CHARS`] characters,
    /// or `None` if nothing but blank lines was captured.
    pub fn context(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let joined = self
            .lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        let total = joined.chars().count();
        if total <= MAX_CONTEXT_CHARS {
            return Some(joined);
        }
        Some(joined.chars().skip(total - MAX_CONTEXT_CHARS).collect())
    }
}

/// Shared handle to a service's diagnostic buffer.
pub type SharedDiagnostics = Arc<Mutex<DiagnosticBuffer>>;

pub fn shared_buffer() -> SharedDiagnostics {
    Arc::new(Mutex::new(DiagnosticBuffer::new(DEFAULT_DIAGNOSTIC_LINES)))
}

/// Start a background task that drains `stream` line by line into `buffer`.
///
/// Each line is logged at debug level. The task ends at end-of-stream, on a
/// read error, or when `cancel` fires.
pub fn start_diagnostic_drain<R>(
    stream: R,
    server: String,
    buffer: SharedDiagnostics,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            tokio::select! {
                line_result = lines.next_line() => {
                    match line_result {
                        Ok(Some(line)) => {
                            tracing::debug!(server = %server, line = %line, "server stderr");
                            buffer.lock().await.push(line);
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_buffer_capacity() {
        let mut buf = DiagnosticBuffer::new(3);
        buf.push("line1".to_string());
        buf.push("line2".to_string());
        buf.push("line3".to_string());
        buf.push("line4".to_string());
        assert_eq!(buf.lines().len(), 3);
        assert_eq!(buf.lines().front().unwrap(), "line2");
        assert_eq!(buf.lines().back().unwrap(), "line4");
    }

    #[test]
    fn test_context_none_when_blank() {
        let mut buf = DiagnosticBuffer::new(3);
        assert_eq!(buf.context(), None);
        buf.push("   ".to_string());
        assert_eq!(buf.context(), None);
    }

    #[test]
    fn test_context_keeps_tail() {
        let mut buf = DiagnosticBuffer::new(10);
        buf.push("x".repeat(MAX_CONTEXT_CHARS));
        buf.push("panic: boom".to_string());
        let context = buf.context().unwrap();
        assert_eq!(context.chars().count(), MAX_CONTEXT_CHARS);
        assert!(context.ends_with("panic: boom"));
    }

    #[tokio::test]
    async fn test_drain_collects_lines() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let buffer = shared_buffer();
        let handle = start_diagnostic_drain(
            reader,
            "svc".to_string(),
            buffer.clone(),
            CancellationToken::new(),
        );
        writer.write_all(b"starting up\nlistening on stdio\n").await.unwrap();
        drop(writer);
        handle.await.unwrap();
        let buf = buffer.lock().await;
        assert_eq!(buf.lines().len(), 2);
        assert_eq!(
            buf.context().as_deref(),
            Some("starting up\nlistening on stdio")
        );
    }

    #[tokio::test]
    async fn test_drain_stops_on_cancel() {
        let (_writer, reader) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();
        let handle = start_diagnostic_drain(reader, "svc".to_string(), shared_buffer(), cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
