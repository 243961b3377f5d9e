//! Scripts and their header annotations

pub mod loader;

pub use loader::{load_scripts, ScriptError};

use std::time::Duration;

use serde::Serialize;

/// A loaded check script, immutable for the process lifetime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Script {
    pub name: String,
    #[serde(skip)]
    pub body: String,
    /// Default channel set for raises that name none
    pub channels: Vec<String>,
    /// Schedule override; `None` follows the runner's update interval
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Run deadline override
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(skip)]
    pub ignore: bool,
}

impl Script {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            channels: Vec::new(),
            interval: None,
            timeout: None,
            ignore: false,
        }
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Parse `-- @key value` annotations from the leading comment block.
    ///
    /// Recognized: `@ignore`, `@name`, `@interval`, `@timeout`, `@channels`.
    pub fn parse_meta(mut self) -> Result<Self, ScriptError> {
        let body = self.body.clone();
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(comment) = line.strip_prefix("--") else {
                break;
            };
            let Some(annotation) = comment.trim().strip_prefix('@') else {
                continue;
            };

            let (key, value) = annotation
                .split_once(char::is_whitespace)
                .map(|(k, v)| (k, v.trim()))
                .unwrap_or((annotation, ""));

            match key {
                "ignore" => self.ignore = true,
                "name" if !value.is_empty() => self.name = value.to_string(),
                "interval" => self.interval = Some(parse_duration(&self.name, key, value)?),
                "timeout" => self.timeout = Some(parse_duration(&self.name, key, value)?),
                "channels" => {
                    self.channels = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect();
                }
                _ => {}
            }
        }
        Ok(self)
    }
}

fn parse_duration(script: &str, key: &str, value: &str) -> Result<Duration, ScriptError> {
    let duration = humantime::parse_duration(value).map_err(|e| ScriptError::Meta {
        script: script.to_string(),
        message: format!("@{} '{}': {}", key, value, e),
    })?;
    if duration.is_zero() {
        return Err(ScriptError::Meta {
            script: script.to_string(),
            message: format!("@{} must be greater than zero", key),
        });
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta() {
        let body = "\n-- @name disk-usage\n-- @interval 30s\n-- @timeout 5s\n-- @channels ops, dev\n-- plain comment\nlocal alert = require('alert')\n-- @ignore\n";
        let script = Script::new("file", body).parse_meta().unwrap();

        assert_eq!(script.name, "disk-usage");
        assert_eq!(script.interval, Some(Duration::from_secs(30)));
        assert_eq!(script.timeout, Some(Duration::from_secs(5)));
        assert_eq!(script.channels, vec!["ops", "dev"]);
        // Annotations after the first statement are ignored
        assert!(!script.ignore);
    }

    #[test]
    fn test_ignore_annotation() {
        let script = Script::new("x", "-- @ignore\nprint(1)").parse_meta().unwrap();
        assert!(script.ignore);
    }

    #[test]
    fn test_bad_interval() {
        let err = Script::new("x", "-- @interval soon\n").parse_meta().unwrap_err();
        assert!(err.to_string().contains("@interval"));

        assert!(Script::new("x", "-- @interval 0s\n").parse_meta().is_err());
    }
}
