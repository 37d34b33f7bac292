//! Output capture for sandboxed code.
//!
//! Every call gets fresh sinks; the host's own stdout and stderr are never
//! written to. Sinks are capped, and writes past the cap are dropped and
//! recorded as truncation.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::runtime::value::StreamKind;

/// A capped, shareable output buffer.
#[derive(Clone, Debug)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
    truncated: Arc<AtomicBool>,
    limit: usize,
}

impl CapturedOutput {
    /// Create an empty buffer that keeps at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            truncated: Arc::new(AtomicBool::new(false)),
            limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append text, keeping whole characters up to the limit. Returns
    /// `false` once anything had to be dropped.
    pub fn write_str(&self, text: &str) -> bool {
        let mut buffer = self.lock();
        let room = self.limit.saturating_sub(buffer.len());
        if text.len() <= room {
            buffer.extend_from_slice(text.as_bytes());
            return true;
        }
        let mut cut = room;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        buffer.extend_from_slice(&text.as_bytes()[..cut]);
        self.truncated.store(true, Ordering::Relaxed);
        false
    }

    /// Get the captured output as a string.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// Whether any output was dropped at the limit.
    pub fn is_truncated(&self) -> bool {
        self.truncated.load(Ordering::Relaxed)
    }

    /// Get the length of captured data.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.write_str(&text);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// The two capture sinks of one execution.
#[derive(Clone, Debug)]
pub struct SandboxIo {
    /// Captured stdout.
    pub stdout: CapturedOutput,
    /// Captured stderr.
    pub stderr: CapturedOutput,
}

impl SandboxIo {
    /// Fresh sinks, each capped at `max_output_bytes`.
    pub fn new(max_output_bytes: usize) -> Self {
        Self {
            stdout: CapturedOutput::with_limit(max_output_bytes),
            stderr: CapturedOutput::with_limit(max_output_bytes),
        }
    }

    pub fn stream(&self, kind: StreamKind) -> &CapturedOutput {
        match kind {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }

    /// Get the captured stdout as a string.
    pub fn stdout_str(&self) -> String {
        self.stdout.to_string_lossy()
    }

    /// Get the captured stderr as a string.
    pub fn stderr_str(&self) -> String {
        self.stderr.to_string_lossy()
    }

    /// Whether either stream hit its cap.
    pub fn truncated(&self) -> bool {
        self.stdout.is_truncated() || self.stderr.is_truncated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_output() {
        let mut output = CapturedOutput::with_limit(1024);
        output.write_all(b"hello ").unwrap();
        output.write_all(b"world").unwrap();
        assert_eq!(output.to_string_lossy(), "hello world");
        assert!(!output.is_truncated());
    }

    #[test]
    fn test_output_is_capped_on_char_boundary() {
        let output = CapturedOutput::with_limit(5);
        assert!(output.write_str("abcd"));
        assert!(!output.write_str("é!"));
        assert_eq!(output.to_string_lossy(), "abcd");
        assert!(output.is_truncated());
        assert!(!output.write_str("more"));
        assert_eq!(output.len(), 4);
    }

    #[test]
    fn test_sandbox_io_streams_are_separate() {
        let io = SandboxIo::new(64);
        io.stream(StreamKind::Stderr).write_str("warning");
        assert!(io.stdout_str().is_empty());
        assert_eq!(io.stderr_str(), "warning");
        assert!(!io.truncated());
    }
}
