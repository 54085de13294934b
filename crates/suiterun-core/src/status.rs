//! Status enums for Runs and Task results.

use serde::{Deserialize, Deserializer, Serialize};

use crate::CoreError;

/// Lifecycle status of a Run, persisted in the run store.
///
/// Statuses are ordered; a run only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RunStatus {
    /// Run created; nothing published yet.
    #[default]
    Initialized,
    /// Tasks are in the queue.
    Published,
    /// Worker pool launch was accepted.
    Running,
    /// All tasks drained and the run was reported.
    Completed,
}

impl RunStatus {
    /// The status that follows this one, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Initialized => Some(Self::Published),
            Self::Published => Some(Self::Running),
            Self::Running => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Returns true if no further transition exists.
    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }

    /// Validate a forward move to `to`.
    pub fn advance_to(self, to: Self) -> Result<Self, CoreError> {
        if self.next() == Some(to) {
            Ok(to)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "Initialized",
            Self::Published => "Published",
            Self::Running => "Running",
            Self::Completed => "Completed",
        }
    }
}

// Empty or null status is an Initialized run.
impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().unwrap_or_default() {
            "" | "Initialized" => Ok(Self::Initialized),
            "Published" => Ok(Self::Published),
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            other => Err(serde::de::Error::unknown_variant(
                other,
                &["Initialized", "Published", "Running", "Completed"],
            )),
        }
    }
}

/// Outcome of executing one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// Command exited successfully.
    Passed,
    /// Command exited with failure before the time bound.
    Failed,
    /// Command hit the time bound and was killed.
    Timeout,
    /// Task could not be executed (malformed payload).
    Error,
}

/// Terminal status of a task result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// The task ran to a verdict.
    Completed,
    /// The delivery could not be turned into an execution.
    Error,
}

/// Status of a task record when the store tracks checkout state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackedStatus {
    /// Not yet checked out.
    #[default]
    #[serde(alias = "Initialized")]
    Initialized,
    /// Checked out by a worker, no verdict yet.
    #[serde(alias = "Scheduled")]
    Scheduled,
    /// Verdict recorded.
    #[serde(alias = "Completed")]
    Completed,
    /// Recorded as errored.
    #[serde(alias = "Error")]
    Error,
    /// Anything the store reports that we do not know.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_empty_is_initialized() {
        let status: RunStatus = serde_json::from_str("\"\"").unwrap();
        assert_eq!(status, RunStatus::Initialized);

        let status: RunStatus = serde_json::from_str("null").unwrap();
        assert_eq!(status, RunStatus::Initialized);
    }

    #[test]
    fn test_run_status_rejects_unknown() {
        assert!(serde_json::from_str::<RunStatus>("\"Paused\"").is_err());
    }

    #[test]
    fn test_run_status_advances_one_step() {
        assert_eq!(
            RunStatus::Initialized.advance_to(RunStatus::Published).unwrap(),
            RunStatus::Published
        );
        assert!(RunStatus::Initialized
            .advance_to(RunStatus::Running)
            .is_err());
        assert!(RunStatus::Running.advance_to(RunStatus::Published).is_err());
        assert!(RunStatus::Completed.is_terminal());
    }

    #[test]
    fn test_run_status_order() {
        assert!(RunStatus::Initialized < RunStatus::Published);
        assert!(RunStatus::Running < RunStatus::Completed);
    }

    #[test]
    fn test_tracked_status_accepts_both_cases() {
        let s: TrackedStatus = serde_json::from_str("\"scheduled\"").unwrap();
        assert_eq!(s, TrackedStatus::Scheduled);
        let s: TrackedStatus = serde_json::from_str("\"Scheduled\"").unwrap();
        assert_eq!(s, TrackedStatus::Scheduled);
        let s: TrackedStatus = serde_json::from_str("\"exploded\"").unwrap();
        assert_eq!(s, TrackedStatus::Unknown);
    }
}
