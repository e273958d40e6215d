use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::async_op::OperationContext;
use crate::config::LogLevel;

/// Receives every log line the SDK emits at or above the configured threshold
pub trait LoggerDelegate: Send + Sync {
    /// Called once with the MIP storage path when the context is created
    fn init(&self, storage_path: &Path);

    fn flush(&self);

    fn write_to_log(&self, level: LogLevel, message: &str, function: &str, file: &str, line: u32);

    /// Context-aware variant; the context is the one the application attached
    /// to the originating operation
    fn write_to_log_with_context(
        &self,
        level: LogLevel,
        message: &str,
        function: &str,
        file: &str,
        line: u32,
        _context: Option<&OperationContext>,
    ) {
        self.write_to_log(level, message, function, file, line);
    }
}

/// Default logger forwarding to `tracing` events
#[derive(Debug, Default)]
pub struct TracingLoggerDelegate {
    storage_path: Mutex<Option<PathBuf>>,
}

impl TracingLoggerDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage_path(&self) -> Option<PathBuf> {
        self.storage_path.lock().clone()
    }
}

impl LoggerDelegate for TracingLoggerDelegate {
    fn init(&self, storage_path: &Path) {
        *self.storage_path.lock() = Some(storage_path.to_path_buf());
        debug!(path = %storage_path.display(), "logger initialized");
    }

    fn flush(&self) {}

    fn write_to_log(&self, level: LogLevel, message: &str, function: &str, file: &str, line: u32) {
        match level {
            LogLevel::Trace => trace!(function, file, line, "{}", message),
            LogLevel::Info => info!(function, file, line, "{}", message),
            LogLevel::Warning => warn!(function, file, line, "{}", message),
            LogLevel::Error => error!(function, file, line, "{}", message),
        }
    }
}
