//! The logging collaborator the engine reports to.
//!
//! Retries and escalations are written through an [`EventLog`]; internal
//! diagnostics go straight to `tracing`.

mod file;
mod queue;

use std::error::Error;

use chrono::{DateTime, Local};

use crate::error::DISPLAY_DATETIME_FORMAT;

pub use file::FileLog;
pub use queue::QueuedLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Info,
}

/// One rendered log event. Owned so it can cross a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub header: String,
    pub text: String,
    /// `source()` chain of an exception, outermost first.
    pub causes: Vec<String>,
    pub context: Vec<String>,
}

impl LogEntry {
    #[must_use]
    pub fn exception(err: &(dyn Error + 'static), header: &str, context: &[String]) -> Self {
        let mut causes = Vec::new();
        let mut next = err.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }
        Self {
            timestamp: Local::now(),
            level: LogLevel::Error,
            header: header.to_string(),
            text: err.to_string(),
            causes,
            context: context.to_vec(),
        }
    }

    #[must_use]
    pub fn message(text: &str, header: &str, context: &[String]) -> Self {
        Self {
            timestamp: Local::now(),
            level: LogLevel::Info,
            header: header.to_string(),
            text: text.to_string(),
            causes: Vec::new(),
            context: context.to_vec(),
        }
    }

    /// Multi-line rendering used by [`FileLog`].
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} {:?} [{}] {}",
            self.timestamp.format(DISPLAY_DATETIME_FORMAT),
            self.level,
            self.header,
            self.text
        );
        for cause in &self.causes {
            out.push_str("\n    Caused by: ");
            out.push_str(cause);
        }
        if !self.context.is_empty() {
            out.push_str("\n    Context: ");
            out.push_str(&self.context.join("; "));
        }
        out
    }
}

/// Fire-and-forget sink for exceptions and messages.
///
/// Implementors only provide [`EventLog::write`]; callers use the two
/// `log_*` helpers. `write` must not block on slow I/O for long, and must
/// not fail.
pub trait EventLog: Send + Sync {
    fn write(&self, entry: &LogEntry);

    fn log_exception(&self, err: &(dyn Error + 'static), header: &str, context: &[String]) {
        self.write(&LogEntry::exception(err, header, context));
    }

    fn log_message(&self, text: &str, header: &str, context: &[String]) {
        self.write(&LogEntry::message(text, header, context));
    }
}

/// Forwards entries to `tracing`. The default collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl EventLog for TracingLog {
    fn write(&self, entry: &LogEntry) {
        match entry.level {
            LogLevel::Error => tracing::error!(
                header = %entry.header,
                causes = ?entry.causes,
                context = ?entry.context,
                "{}",
                entry.text
            ),
            LogLevel::Info => tracing::info!(
                header = %entry.header,
                context = ?entry.context,
                "{}",
                entry.text
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SqlResilienceError;

    #[test]
    fn exception_entry_walks_source_chain() {
        let io = std::io::Error::other("disk gone");
        let err = SqlResilienceError::Other(io.to_string());
        let entry = LogEntry::exception(&err, "Query", &["id = 1".into()]);
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.text, "Other database error: disk gone");
        assert!(entry.causes.is_empty());
        let rendered = entry.render();
        assert!(rendered.contains("[Query] Other database error: disk gone"));
        assert!(rendered.ends_with("Context: id = 1"));
    }
}
