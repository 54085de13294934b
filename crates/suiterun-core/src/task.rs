//! Task settings (the queue payload) and task results (the store records).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CoreError, RunId, TaskOutcome, TaskStatus, TrackedStatus, WorkerName};

/// Execution descriptor of one test case. Immutable once published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSetting {
    /// Payload format version.
    #[serde(rename = "ver", default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// How to run the task; `command` is required.
    #[serde(default)]
    pub execution: HashMap<String, String>,

    /// What the task is; `identifier` is required.
    #[serde(default)]
    pub classifier: HashMap<String, String>,

    /// Anything else the index script attached.
    #[serde(rename = "misc", default, skip_serializing_if = "HashMap::is_empty")]
    pub miscellanea: HashMap<String, String>,
}

impl TaskSetting {
    /// Create a setting with an identifier and a command.
    pub fn new(identifier: impl Into<String>, command: impl Into<String>) -> Self {
        let mut setting = Self::default();
        setting
            .classifier
            .insert("identifier".to_string(), identifier.into());
        setting.execution.insert("command".to_string(), command.into());
        setting
    }

    /// Decode a queue payload, rejecting settings without a command.
    pub fn decode(payload: &[u8]) -> Result<Self, CoreError> {
        let setting = Self::parse(payload)?;
        setting.validate()?;
        Ok(setting)
    }

    /// Deserialize a queue payload without checking that it is runnable.
    pub fn parse(payload: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(payload).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Check that the setting carries a non-blank command.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.command() {
            Some(command) if !command.trim().is_empty() => Ok(()),
            _ => Err(CoreError::InvalidInput(
                "task setting has no execution.command".to_string(),
            )),
        }
    }

    /// Unique identifier of the test case.
    pub fn identifier(&self) -> &str {
        self.classifier
            .get("identifier")
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Shell command to execute.
    pub fn command(&self) -> Option<&str> {
        self.execution.get("command").map(String::as_str)
    }

    /// Display name used for the result record.
    pub fn task_name(&self) -> String {
        format!("Test: {}", self.identifier())
    }
}

/// Persisted outcome of executing (or failing to parse) one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Store-assigned identifier; absent until committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Run the task belongs to.
    pub run_id: RunId,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Verdict.
    pub result: TaskOutcome,

    /// Record status.
    pub status: TaskStatus,

    /// Wall-clock execution time in seconds.
    #[serde(default)]
    pub duration: u64,

    /// Agent, error text, log paths and other details.
    #[serde(default)]
    pub result_details: HashMap<String, Value>,

    /// Echo of the originating setting.
    #[serde(default)]
    pub settings: TaskSetting,

    /// Free-form annotation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub annotation: String,
}

impl TaskResult {
    /// A task that ran to a verdict.
    pub fn completed(
        setting: &TaskSetting,
        outcome: TaskOutcome,
        duration_secs: u64,
        agent: &WorkerName,
        run_id: RunId,
    ) -> Self {
        let mut result_details = HashMap::new();
        result_details.insert("agent".to_string(), Value::from(agent.as_str()));

        Self {
            id: None,
            run_id,
            name: setting.task_name(),
            result: outcome,
            status: TaskStatus::Completed,
            duration: duration_secs,
            result_details,
            settings: setting.clone(),
            annotation: String::new(),
        }
    }

    /// A delivery that could not be executed.
    pub fn errored(
        setting: &TaskSetting,
        agent: &WorkerName,
        run_id: RunId,
        error: impl Into<String>,
    ) -> Self {
        let mut result_details = HashMap::new();
        result_details.insert("agent".to_string(), Value::from(agent.as_str()));
        result_details.insert("error".to_string(), Value::from(error.into()));

        Self {
            id: None,
            run_id,
            name: setting.task_name(),
            result: TaskOutcome::Error,
            status: TaskStatus::Error,
            duration: 0,
            result_details,
            settings: setting.clone(),
            annotation: String::new(),
        }
    }

    /// Add or replace a detail.
    pub fn set_detail(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.result_details.insert(key.into(), value.into());
    }

    /// Error text of an errored result.
    pub fn error_message(&self) -> Option<&str> {
        self.result_details.get("error").and_then(Value::as_str)
    }
}

/// A task as seen by a store that tracks checkout state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Store-assigned identifier.
    pub id: u64,

    /// Checkout status.
    #[serde(default)]
    pub status: TrackedStatus,

    /// Details, including the `agent` that checked the task out.
    #[serde(default)]
    pub result_details: HashMap<String, Value>,
}

impl TaskRecord {
    /// Pod that checked the task out (`agent` up to `@`).
    pub fn agent_pod(&self) -> Option<&str> {
        self.result_details
            .get("agent")
            .and_then(Value::as_str)
            .and_then(|agent| agent.split('@').next())
            .filter(|pod| !pod.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setting_wire_format() {
        let setting = TaskSetting::new("storage.test_upload", "pytest -k test_upload");
        let value = serde_json::to_value(&setting).unwrap();

        assert_eq!(value["execution"]["command"], "pytest -k test_upload");
        assert_eq!(value["classifier"]["identifier"], "storage.test_upload");
        assert!(value.get("ver").is_none());
        assert!(value.get("misc").is_none());
    }

    #[test]
    fn test_decode_reads_misc_and_ver() {
        let payload = json!({
            "ver": "1.0",
            "execution": {"command": "true"},
            "classifier": {"identifier": "a.b"},
            "misc": {"owner": "team"},
        });
        let setting = TaskSetting::decode(payload.to_string().as_bytes()).unwrap();
        assert_eq!(setting.version, "1.0");
        assert_eq!(setting.miscellanea["owner"], "team");
        assert_eq!(setting.identifier(), "a.b");
    }

    #[test]
    fn test_decode_rejects_garbage_and_missing_command() {
        assert!(TaskSetting::decode(b"not json").is_err());

        let no_command = json!({"classifier": {"identifier": "a"}});
        assert!(TaskSetting::decode(no_command.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_parse_keeps_setting_without_command() {
        let payload = json!({
            "classifier": {"identifier": "a.nocmd"},
            "execution": {"command": "  ", "cwd": "/srv"},
        });
        let setting = TaskSetting::parse(payload.to_string().as_bytes()).unwrap();

        assert_eq!(setting.identifier(), "a.nocmd");
        assert_eq!(setting.execution["cwd"], "/srv");
        assert!(matches!(setting.validate(), Err(CoreError::InvalidInput(_))));
        assert!(TaskSetting::parse(b"[1, 2]").is_err());
    }

    #[test]
    fn test_completed_result() {
        let setting = TaskSetting::new("a.b", "true");
        let agent = WorkerName::new("pod-1@node-1");
        let result = TaskResult::completed(&setting, TaskOutcome::Passed, 3, &agent, RunId::new(9));

        assert_eq!(result.name, "Test: a.b");
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.result_details["agent"], "pod-1@node-1");

        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["run_id"], 9);
        assert_eq!(value["result"], "Passed");
        assert_eq!(value["duration"], 3);
    }

    #[test]
    fn test_errored_result() {
        let agent = WorkerName::new("w");
        let result = TaskResult::errored(&TaskSetting::default(), &agent, RunId::new(1), "bad json");

        assert_eq!(result.status, TaskStatus::Error);
        assert_eq!(result.result, TaskOutcome::Error);
        assert_eq!(result.error_message(), Some("bad json"));
    }

    #[test]
    fn test_record_agent_pod() {
        let record: TaskRecord = serde_json::from_value(json!({
            "id": 3,
            "status": "scheduled",
            "result_details": {"agent": "pod-7@node-2"},
        }))
        .unwrap();
        assert_eq!(record.agent_pod(), Some("pod-7"));
        assert_eq!(record.status, TrackedStatus::Scheduled);

        let bare: TaskRecord = serde_json::from_value(json!({"id": 4})).unwrap();
        assert_eq!(bare.agent_pod(), None);
        assert_eq!(bare.status, TrackedStatus::Initialized);
    }
}
