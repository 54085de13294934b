//! Run record and its typed settings.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{keys, CoreError, JobName, RunId, RunStatus};

/// One end-to-end execution of a test suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Store-assigned run identifier.
    pub id: RunId,

    /// Human-readable name.
    #[serde(default)]
    pub name: String,

    /// Open settings map supplied when the run was queued.
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: HashMap<String, Value>,

    /// Correlation state written by the dispatcher.
    #[serde(default, deserialize_with = "null_as_default")]
    pub details: HashMap<String, String>,

    /// Persisted lifecycle status.
    #[serde(default)]
    pub status: RunStatus,
}

impl Run {
    /// Create a new Initialized run.
    pub fn new(id: RunId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            settings: HashMap::new(),
            details: HashMap::new(),
            status: RunStatus::Initialized,
        }
    }

    /// Builder method to add a setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Builder method to set the status (useful for testing).
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    /// Product recorded in the details, if any.
    pub fn product(&self) -> Option<&str> {
        self.details.get(keys::PRODUCT).map(String::as_str)
    }

    /// Job name recorded in the details, if any.
    pub fn job_name(&self) -> Option<Result<JobName, CoreError>> {
        self.details.get(keys::JOB_NAME).map(|name| JobName::parse(name))
    }

    /// Validate and convert the open settings map.
    pub fn typed_settings(&self) -> Result<RunSettings, CoreError> {
        RunSettings::from_settings(&self.settings)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Typed view of [`Run::settings`].
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Only tasks whose identifier matches are published.
    pub test_query: Option<Regex>,
    /// Tasks whose identifier matches are dropped.
    pub exclude_query: Option<Regex>,
    /// Worker pool size.
    pub parallelism: u32,
    /// Owner of the run, always notified.
    pub user_email: Option<String>,
    /// Free-form remark.
    pub remark: Option<String>,
    /// Secret name override.
    pub secret_name: Option<String>,
    /// Worker image.
    pub image_name: Option<String>,
    /// Live mode switch.
    pub live_mode: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            test_query: None,
            exclude_query: None,
            parallelism: 1,
            user_email: None,
            remark: None,
            secret_name: None,
            image_name: None,
            live_mode: false,
        }
    }
}

impl RunSettings {
    /// Convert the open settings map. All problems are reported at once.
    pub fn from_settings(settings: &HashMap<String, Value>) -> Result<Self, CoreError> {
        let mut problems = Vec::new();
        let mut typed = Self::default();

        typed.test_query = regex_setting(settings, keys::TEST_QUERY, &mut problems);
        typed.exclude_query = regex_setting(settings, keys::TEST_EXCLUDE_QUERY, &mut problems);
        typed.user_email = string_setting(settings, keys::USER_EMAIL, &mut problems);
        typed.remark = string_setting(settings, keys::REMARK, &mut problems);
        typed.secret_name = string_setting(settings, keys::SECRET_NAME, &mut problems)
            .filter(|name| !name.is_empty());
        typed.image_name = string_setting(settings, keys::IMAGE_NAME, &mut problems);

        match settings.get(keys::INIT_PARALLELISM) {
            None | Some(Value::Null) => {}
            Some(value) => match parallelism(value) {
                Some(n) if n >= 1 => typed.parallelism = n,
                _ => problems.push(format!(
                    "{}: expected a positive integer, got {}",
                    keys::INIT_PARALLELISM,
                    value
                )),
            },
        }

        match settings.get(keys::LIVE_MODE) {
            None | Some(Value::Null) => {}
            Some(Value::Bool(b)) => typed.live_mode = *b,
            Some(Value::String(s)) => typed.live_mode = s.eq_ignore_ascii_case("true"),
            Some(other) => problems.push(format!(
                "{}: expected a boolean, got {}",
                keys::LIVE_MODE,
                other
            )),
        }

        if problems.is_empty() {
            Ok(typed)
        } else {
            Err(CoreError::InvalidSettings(problems.join("; ")))
        }
    }

    /// Whether a task identifier survives the include and exclude filters.
    pub fn selects(&self, identifier: &str) -> bool {
        let included = self
            .test_query
            .as_ref()
            .map_or(true, |re| re.is_match(identifier));
        let excluded = self
            .exclude_query
            .as_ref()
            .is_some_and(|re| re.is_match(identifier));
        included && !excluded
    }

    /// An official run reports to the product owners.
    pub fn is_official(&self) -> bool {
        self.remark
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case("official"))
    }

    /// Secret to read product configuration from.
    pub fn secret_name<'a>(&'a self, product: &'a str) -> &'a str {
        self.secret_name.as_deref().unwrap_or(product)
    }
}

fn string_setting(
    settings: &HashMap<String, Value>,
    key: &str,
    problems: &mut Vec<String>,
) -> Option<String> {
    match settings.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            problems.push(format!("{}: expected a string, got {}", key, other));
            None
        }
    }
}

fn regex_setting(
    settings: &HashMap<String, Value>,
    key: &str,
    problems: &mut Vec<String>,
) -> Option<Regex> {
    let pattern = string_setting(settings, key, problems)?;
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            problems.push(format!("{}: invalid pattern '{}': {}", key, pattern, e));
            None
        }
    }
}

fn parallelism(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= 0.0 && f <= f64::from(u32::MAX) {
        Some(f as u32)
    } else {
        None
    }
}
