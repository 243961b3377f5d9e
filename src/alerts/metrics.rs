//! In-process alert counters, exported by the management API

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

use super::level::Level;

/// Raise counter per `(alert, level)` and the last raised level per alert
#[derive(Default)]
pub struct AlertMetrics {
    raises: DashMap<(String, Level), u64>,
    levels: DashMap<String, Level>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AlertMetric {
    pub alert: String,
    pub level: Level,
    pub level_value: i64,
    pub raises: BTreeMap<Level, u64>,
}

impl AlertMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, alert: &str, level: Level) {
        *self
            .raises
            .entry((alert.to_string(), level))
            .or_insert(0) += 1;
        self.levels.insert(alert.to_string(), level);
    }

    pub fn raises(&self, alert: &str, level: Level) -> u64 {
        self.raises
            .get(&(alert.to_string(), level))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Sorted by alert name
    pub fn snapshot(&self) -> Vec<AlertMetric> {
        let mut out: Vec<AlertMetric> = self
            .levels
            .iter()
            .map(|entry| {
                let alert = entry.key().clone();
                let level = *entry.value();
                let raises = Level::ALL
                    .iter()
                    .filter_map(|l| {
                        let n = self.raises(&alert, *l);
                        (n > 0).then_some((*l, n))
                    })
                    .collect();
                AlertMetric {
                    alert,
                    level,
                    level_value: level.as_i64(),
                    raises,
                }
            })
            .collect();
        out.sort_by(|a, b| a.alert.cmp(&b.alert));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = AlertMetrics::new();
        metrics.record("disk", Level::Warning);
        metrics.record("disk", Level::Warning);
        metrics.record("disk", Level::Error);
        metrics.record("cpu", Level::Success);

        assert_eq!(metrics.raises("disk", Level::Warning), 2);
        assert_eq!(metrics.raises("disk", Level::Success), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].alert, "cpu");
        assert_eq!(snapshot[1].level, Level::Error);
        assert_eq!(snapshot[1].level_value, 3);
        assert_eq!(snapshot[1].raises.get(&Level::Warning), Some(&2));
    }
}
