use std::sync::{Mutex, MutexGuard};

use crate::logging::{EventLog, LogEntry, LogLevel};

/// Keeps every entry in memory for assertions.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Entries written through `log_exception`.
    #[must_use]
    pub fn exceptions(&self) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.level == LogLevel::Error)
            .cloned()
            .collect()
    }

    /// Entries written through `log_message`.
    #[must_use]
    pub fn messages(&self) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.level == LogLevel::Info)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl EventLog for MemoryLog {
    fn write(&self, entry: &LogEntry) {
        self.lock().push(entry.clone());
    }
}
