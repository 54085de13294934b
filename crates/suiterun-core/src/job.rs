//! Job correlation key: `<product>-<runID>-<random>`.
//!
//! The same string names the run's queue and labels its worker pool, and the
//! worker recovers the run id from it, so every component must agree on it.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{CoreError, RunId};

/// Length of the random suffix of a generated job name.
pub const SUFFIX_LEN: usize = 12;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Correlation key binding a run's queue, worker pool and run record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobName {
    product: String,
    run_id: RunId,
    suffix: String,
}

impl JobName {
    /// Generate a fresh job name for a run.
    pub fn generate(product: &str, run_id: RunId) -> Result<Self, CoreError> {
        validate_product(product)?;

        let mut rng = rand::thread_rng();
        let suffix = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();

        Ok(Self {
            product: product.to_string(),
            run_id,
            suffix,
        })
    }

    /// Parse an existing job name.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidJobName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = name.splitn(3, '-');
        let product = parts.next().unwrap_or_default();
        let run_id = parts.next().ok_or_else(|| invalid("missing run id"))?;
        let suffix = parts.next().ok_or_else(|| invalid("missing random suffix"))?;

        if product.is_empty() {
            return Err(invalid("empty product"));
        }
        if suffix.is_empty() {
            return Err(invalid("empty random suffix"));
        }
        let run_id = run_id
            .parse::<u64>()
            .map_err(|_| invalid("run id is not a number"))?;

        Ok(Self {
            product: product.to_string(),
            run_id: RunId::new(run_id),
            suffix: suffix.to_string(),
        })
    }

    /// Product this job tests.
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Run this job belongs to.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }
}

fn validate_product(product: &str) -> Result<(), CoreError> {
    if product.is_empty() || product.contains('-') {
        return Err(CoreError::InvalidInput(format!(
            "product name '{}' must be non-empty and contain no '-'",
            product
        )));
    }
    Ok(())
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.product, self.run_id, self.suffix)
    }
}

impl FromStr for JobName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobName {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<JobName> for String {
    fn from(job: JobName) -> Self {
        job.to_string()
    }
}
