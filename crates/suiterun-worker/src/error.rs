//! Worker errors.

use suiterun_broker::BrokerError;
use suiterun_core::CoreError;
use thiserror::Error;

use crate::ExecutorError;

/// Errors that end the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Lost the broker: connect, declare or fetch failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The job name does not follow `<product>-<runID>-<suffix>`.
    #[error("invalid job name: {0}")]
    JobName(#[from] CoreError),

    /// The pod preparation script failed.
    #[error("failed to prepare the worker: {0}")]
    Prepare(#[source] ExecutorError),
}
