//! Progress sinks for user-visible status lines and streamed remote output.

use std::io::Write;
use std::sync::Mutex;

/// Receives one line of user-facing output at a time.
pub trait ProgressSink: Send + Sync {
    /// Emits a single line. Implementations must not block for long; remote
    /// output relays call this for every line they read.
    fn output(&self, line: &str);
}

/// Forwards progress lines to `tracing` at `INFO` level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn output(&self, line: &str) {
        tracing::info!(target: "salt_provisioner::progress", "{line}");
    }
}

/// Writes progress lines to any [`Write`] implementation, one per line.
#[derive(Debug)]
pub struct WriterProgress<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterProgress<W> {
    /// Wraps `writer`.
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the wrapped writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> ProgressSink for WriterProgress<W> {
    fn output(&self, line: &str) {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(writer, "{line}").ok();
        writer.flush().ok();
    }
}
