use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{EventLog, LogEntry};

/// Appends rendered entries to a file, falling back to stderr when the file
/// cannot be written.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLog {
    /// Open `path` for appending, creating it if needed.
    ///
    /// # Errors
    /// Any I/O error from opening the file.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLog for FileLog {
    fn write(&self, entry: &LogEntry) {
        let line = entry.render();
        let mut handle = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writeln!(handle, "{line}").and_then(|()| handle.flush()) {
            eprintln!(
                "failed to write log file {}: {err}\n{line}",
                self.path.display()
            );
        }
    }
}
