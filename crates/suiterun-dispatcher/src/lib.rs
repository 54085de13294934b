//! suiterun dispatcher.
//!
//! One dispatcher instance owns one run. It publishes the run's tasks,
//! launches a worker pool, waits for the pool to drain the queue and sends
//! the report, persisting the run status after every step so a restarted
//! dispatcher resumes where the previous one stopped.

pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod report;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{CompletionMode, Config};
pub use context::Context;
pub use discovery::{ScriptIndex, StaticIndex, TestIndex};
pub use error::DispatchError;
pub use monitor::{reconcile, Monitor, Reconciliation};
pub use pool::{LocalPool, MemberPhase, PoolLauncher, PoolMember, PoolRequest, PoolStatus};
pub use report::{EmailReporter, Reporter};
pub use state_machine::RunStateMachine;
