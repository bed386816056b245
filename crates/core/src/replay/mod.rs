//! Replay of writes that were served by the local fallback
//!
//! Operations are attempted in enqueue order, but a failed operation moves to
//! the tail, so ordering across failures is not preserved.

mod queue;
mod worker;

pub use queue::{DrainReport, ReplayConfig, ReplayQueue};
pub use worker::{ReplayDrain, ReplayWorker, ReplayWorkerConfig, WorkerError};
