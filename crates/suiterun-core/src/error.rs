//! Core domain errors.

use thiserror::Error;

/// Core domain errors for suiterun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Run settings failed validation.
    #[error("Invalid run settings: {0}")]
    InvalidSettings(String),

    /// Job name does not follow `<product>-<runID>-<random>`.
    #[error("Invalid job name '{name}': {reason}")]
    InvalidJobName { name: String, reason: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
