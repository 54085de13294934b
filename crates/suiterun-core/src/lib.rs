//! suiterun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The message broker
//! - The run/result store
//! - Runtime specifics
//!
//! Everything the dispatcher and the workers exchange is defined here.

pub mod error;
pub mod ids;
pub mod job;
pub mod run;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{RunId, WorkerName};
pub use job::JobName;
pub use run::{Run, RunSettings};
pub use status::{RunStatus, TaskOutcome, TaskStatus, TrackedStatus};
pub use task::{TaskRecord, TaskResult, TaskSetting};

/// Reserved keys shared by run settings, run details and result details.
pub mod keys {
    /// Include filter applied to task identifiers.
    pub const TEST_QUERY: &str = "suiterun.testquery";
    /// Exclude filter applied after the include filter.
    pub const TEST_EXCLUDE_QUERY: &str = "suiterun.testexcludequery";
    /// Worker pool size.
    pub const INIT_PARALLELISM: &str = "suiterun.initparallelism";
    /// E-mail of the user who queued the run.
    pub const USER_EMAIL: &str = "suiterun.useremail";
    /// Free-form remark; `official` widens the report audience.
    pub const REMARK: &str = "suiterun.remark";
    /// Secret holding product credentials and reporting config.
    pub const SECRET_NAME: &str = "suiterun.secret";
    /// Worker image forwarded to the pool launcher.
    pub const IMAGE_NAME: &str = "suiterun.imagename";
    /// Live-mode switch forwarded to the pool launcher.
    pub const LIVE_MODE: &str = "suiterun.livemode";

    /// Product name, written into run details.
    pub const PRODUCT: &str = "suiterun.product";
    /// Job/queue name, written into run details.
    pub const JOB_NAME: &str = "suiterun.jobname";

    /// Rendered task log location, patched into result details.
    pub const TASK_LOG_PATH: &str = "suiterun.tasklogpath";
    /// Rendered task recording location, patched into result details.
    pub const TASK_RECORD_PATH: &str = "suiterun.taskrecordpath";
}
