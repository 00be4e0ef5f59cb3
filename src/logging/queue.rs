use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use super::{EventLog, LogEntry};
use crate::error::SqlResilienceError;

enum LogCommand {
    Write(LogEntry),
    Flush {
        respond_to: oneshot::Sender<()>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Bounded queue in front of another [`EventLog`], drained by one worker thread.
///
/// `write` never blocks: when the queue is full the entry is dropped and
/// counted. [`QueuedLog::drain`] waits until everything queued before it has
/// reached the inner log.
pub struct QueuedLog {
    sender: mpsc::Sender<LogCommand>,
    dropped: Arc<AtomicU64>,
}

impl QueuedLog {
    /// Start the worker.
    ///
    /// # Errors
    /// `ConfigError` for a zero capacity, `Other` if the thread cannot be spawned.
    pub fn spawn(inner: Arc<dyn EventLog>, capacity: usize) -> Result<Self, SqlResilienceError> {
        if capacity == 0 {
            return Err(SqlResilienceError::ConfigError(
                "log queue capacity must be greater than zero".to_string(),
            ));
        }
        let (sender, receiver) = mpsc::channel::<LogCommand>(capacity);
        thread::Builder::new()
            .name("sql-resilience-log".to_string())
            .spawn(move || run_log_worker(receiver, inner.as_ref()))
            .map_err(|err| {
                SqlResilienceError::Other(format!("failed to spawn log worker thread: {err}"))
            })?;
        Ok(Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Entries discarded because the queue was full or already shut down.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every entry queued before this call has been written.
    ///
    /// # Errors
    /// `Other` when the worker has already stopped.
    pub async fn drain(&self) -> Result<(), SqlResilienceError> {
        let (tx, rx) = oneshot::channel();
        self.send(LogCommand::Flush { respond_to: tx }).await?;
        rx.await.map_err(|_| worker_gone())
    }

    /// Drain, then stop the worker. Later writes are dropped.
    ///
    /// # Errors
    /// `Other` when the worker has already stopped.
    pub async fn shutdown(&self) -> Result<(), SqlResilienceError> {
        let (tx, rx) = oneshot::channel();
        self.send(LogCommand::Shutdown { respond_to: tx }).await?;
        rx.await.map_err(|_| worker_gone())
    }

    async fn send(&self, command: LogCommand) -> Result<(), SqlResilienceError> {
        self.sender.send(command).await.map_err(|_| worker_gone())
    }
}

fn worker_gone() -> SqlResilienceError {
    SqlResilienceError::Other("log worker stopped".to_string())
}

impl EventLog for QueuedLog {
    fn write(&self, entry: &LogEntry) {
        match self.sender.try_send(LogCommand::Write(entry.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped = total, "log queue full, entry dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("log queue closed, entry dropped");
            }
        }
    }
}

fn run_log_worker(mut receiver: mpsc::Receiver<LogCommand>, inner: &dyn EventLog) {
    while let Some(command) = receiver.blocking_recv() {
        match command {
            LogCommand::Write(entry) => inner.write(&entry),
            LogCommand::Flush { respond_to } => {
                let _ = respond_to.send(());
            }
            LogCommand::Shutdown { respond_to } => {
                receiver.close();
                // entries accepted before the close are still written
                while let Ok(pending) = receiver.try_recv() {
                    match pending {
                        LogCommand::Write(entry) => inner.write(&entry),
                        LogCommand::Flush { respond_to } | LogCommand::Shutdown { respond_to } => {
                            let _ = respond_to.send(());
                        }
                    }
                }
                let _ = respond_to.send(());
                break;
            }
        }
    }
}
