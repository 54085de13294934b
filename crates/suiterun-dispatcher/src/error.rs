//! Dispatcher errors.

use suiterun_broker::BrokerError;
use suiterun_core::{CoreError, RunId};
use suiterun_store::StoreError;
use thiserror::Error;

/// Errors that stop the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Fetching or committing the run failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The broker could not be reached.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The run record is invalid (settings, job name, status).
    #[error("invalid run: {0}")]
    InvalidRun(#[from] CoreError),

    /// A Published or Running run carries no job name.
    #[error("run {0} has no job name in its details")]
    MissingJobName(RunId),

    /// The pool launcher refused the request.
    #[error("pool launch rejected: {0}")]
    PoolRejected(String),

    /// Pool members could not be listed.
    #[error("pool status unavailable: {0}")]
    PoolStatus(String),

    /// The test index could not be produced.
    #[error("test discovery failed: {0}")]
    Discovery(String),

    /// Report delivery failed.
    #[error("report failed: {0}")]
    Report(String),
}
