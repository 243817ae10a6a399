use std::sync::Arc;

use parking_lot::Mutex;

/// Sink for build diagnostics. Loggers are cheap handles that can be
/// cloned onto worker threads, so the trait requires Clone + Send + Sync.
pub trait Logger: Clone + Send + Sync {
    fn log(&self, message: impl Into<String>);
    fn warn(&self, message: impl Into<String>) {
        self.log(format!("WARN: {}", message.into()));
    }
    fn error(&self, message: impl Into<String>) {
        self.log(format!("ERROR: {}", message.into()));
    }
}

impl<T: Logger> Logger for &T {
    fn log(&self, message: impl Into<String>) {
        (*self).log(message);
    }
    fn warn(&self, message: impl Into<String>) {
        (*self).warn(message);
    }
    fn error(&self, message: impl Into<String>) {
        (*self).error(message);
    }
}

/// Prints to stdout with a monotonic timestamp relative to logger creation.
#[derive(Clone)]
pub struct StdioLogger {
    zero_time: std::time::Instant,
}

impl Logger for StdioLogger {
    fn log(&self, message: impl Into<String>) {
        let delta_time = std::time::Instant::now().duration_since(self.zero_time);
        println!("[{:.04}] {}", delta_time.as_secs_f64(), message.into());
    }
}

impl StdioLogger {
    pub fn new() -> Self {
        Self {
            zero_time: std::time::Instant::now(),
        }
    }
}

impl Default for StdioLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects messages into a shared vector. Handles are clones of the same
/// underlying buffer, so a test can hold one handle while the build holds
/// another.
#[derive(Clone, Default)]
pub struct VecLogger {
    logs: Arc<Mutex<Vec<String>>>,
}

impl Logger for VecLogger {
    fn log(&self, message: impl Into<String>) {
        self.logs.lock().push(message.into());
    }
}

impl VecLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }

    pub fn take_logs(&self) -> Vec<String> {
        std::mem::take(&mut *self.logs.lock())
    }
}

/// Logger that drops everything on the floor.
#[derive(Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _message: impl Into<String>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_logger_accumulates_across_clones() {
        let logger = VecLogger::new();
        let clone = logger.clone();
        clone.log("first");
        logger.warn("second");
        assert_eq!(logger.logs(), vec!["first", "WARN: second"]);
    }
}
