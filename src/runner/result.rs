//! Per-script run results retained for reporting

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

/// Outcome of the latest finished run of one script
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub script: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Error text for failures, empty on success
    pub message: String,
}

impl RunResult {
    pub fn success(script: &str, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            script: script.to_string(),
            status: RunStatus::Success,
            started_at,
            duration_ms: duration.as_millis() as u64,
            message: String::new(),
        }
    }

    pub fn failure(
        script: &str,
        started_at: DateTime<Utc>,
        duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            script: script.to_string(),
            status: RunStatus::Failure,
            started_at,
            duration_ms: duration.as_millis() as u64,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Aggregate of a single pass over every script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Script facts plus its scheduling counters, as reported by the API
#[derive(Debug, Clone, Serialize)]
pub struct ScriptStatus {
    pub name: String,
    pub channels: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub running: bool,
    pub skips: u64,
    pub last_run: Option<RunResult>,
}
