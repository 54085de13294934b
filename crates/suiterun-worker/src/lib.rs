//! suiterun worker.
//!
//! A worker belongs to exactly one run. It pulls tasks from the run's queue
//! one at a time, executes each command through a shell, commits the result
//! to the store and only then acknowledges the delivery. It exits once the
//! queue is empty.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod worker;

pub use artifacts::ArtifactStore;
pub use config::Config;
pub use error::WorkerError;
pub use executor::{CommandRunner, ExecutionOutcome, ExecutorError};
pub use hooks::{AfterTaskHook, NoopHook, ScriptHook};
pub use worker::{DrainSummary, WorkerLoop};
