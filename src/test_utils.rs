//! Simulated driver and in-memory log collaborator for tests.

mod memory_log;
mod stub;

pub use memory_log::MemoryLog;
pub use stub::{ExecutedCommand, StubAdapter, StubConnection, StubEvent, StubResponse};
