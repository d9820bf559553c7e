//! The single log stream shared by every watch session.
//!
//! Sessions never print. Everything the user should see (moves, skipped
//! directories, failures) becomes a [`LogRecord`] handed to one callback
//! supplied when the monitor is built. The callback runs under a lock, so the
//! caller observes one ordered stream even though several worker threads
//! report concurrently. Each record is mirrored as a `tracing` event.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info, warn};

/// Severity of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// Lifecycle notices ("monitoring started", "watching ...").
    Info,
    /// A file was organized.
    Success,
    /// Something was skipped but nothing is broken.
    Warning,
    /// An operation failed; the affected file stays where it was.
    Error,
}

/// One line of the log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

type Callback = Box<dyn FnMut(&LogRecord) + Send>;

/// Cloneable handle to the log callback.
#[derive(Clone)]
pub struct LogSink {
    callback: Option<Arc<Mutex<Callback>>>,
}

impl LogSink {
    /// Wraps a callback. It is invoked once per record, never concurrently.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(&LogRecord) + Send + 'static,
    {
        Self {
            callback: Some(Arc::new(Mutex::new(Box::new(callback)))),
        }
    }

    /// A sink that only emits `tracing` events.
    pub fn silent() -> Self {
        Self { callback: None }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(LogLevel::Success, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }

    /// Delivers a record. A panicking callback is contained here so it can
    /// never unwind into a move in progress.
    pub fn emit(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Success => info!(target: "tidywatch::records", "{}", message),
            LogLevel::Warning => warn!(target: "tidywatch::records", "{}", message),
            LogLevel::Error => error!(target: "tidywatch::records", "{}", message),
        }

        let Some(callback) = &self.callback else {
            return;
        };
        let record = LogRecord { level, message };
        let mut guard = callback.lock().unwrap_or_else(PoisonError::into_inner);
        let callback: &mut Callback = &mut guard;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&record)));
        if outcome.is_err() {
            warn!("log callback panicked; record dropped");
        }
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_arrive_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            LogSink::new(move |record| seen.lock().unwrap().push(record.clone()))
        };

        sink.info("one");
        sink.success("two");
        sink.warning("three");
        sink.error("four");

        let seen = seen.lock().unwrap();
        let levels: Vec<_> = seen.iter().map(|r| r.level).collect();
        assert_eq!(
            levels,
            vec![
                LogLevel::Info,
                LogLevel::Success,
                LogLevel::Warning,
                LogLevel::Error
            ]
        );
        assert_eq!(seen[3].to_string(), "four");
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let calls = Arc::new(Mutex::new(0));
        let sink = {
            let calls = Arc::clone(&calls);
            LogSink::new(move |_| {
                *calls.lock().unwrap() += 1;
                panic!("logger exploded");
            })
        };

        sink.error("first");
        sink.error("second");

        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_silent_sink_accepts_records() {
        let sink = LogSink::silent();
        sink.info("nobody listens");
    }
}
