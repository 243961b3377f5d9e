//! Notification channels and fan-out dispatch
//!
//! A [`ChannelRegistry`] is built once at startup and is read-only afterwards.
//! Dispatch delivers to every resolved channel independently: an unknown name
//! or a failing channel is logged and never stops delivery to the others.

pub mod log;
pub mod slack;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use self::log::LogChannel;
pub use slack::SlackChannel;
pub use webhook::WebhookChannel;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::alerts::Message;
use crate::config::ChannelsConfig;

/// A notification delivery target
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &'static str;

    /// Deliver one message. Retries, if any, belong to the implementation.
    async fn send(&self, message: &Message) -> Result<(), ChannelError>;
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    /// `(channel, error)` pairs
    pub failed: Vec<(String, String)>,
    pub unknown: Vec<String>,
    /// Nothing was sent because no channel resolved
    pub empty: bool,
}

impl DispatchReport {
    /// Number of errors logged during the dispatch
    pub fn error_count(&self) -> usize {
        self.failed.len() + self.unknown.len() + usize::from(self.empty)
    }
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, Arc<dyn Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ChannelsConfig) -> Result<Self, ChannelError> {
        let mut registry = Self::new();

        for cfg in &config.log {
            registry.register(Arc::new(LogChannel::new(&cfg.name)));
        }
        for cfg in &config.webhook {
            registry.register(Arc::new(WebhookChannel::new(cfg)?));
        }
        for cfg in &config.slack {
            registry.register(Arc::new(SlackChannel::new(cfg)?));
        }

        Ok(registry)
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        tracing::info!(
            channel = %channel.name(),
            kind = channel.kind(),
            "Registered channel"
        );
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Deliver `message` to the named channels, or to every registered
    /// channel when `names` is empty.
    pub async fn send(&self, message: &Message, names: &[String]) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut resolved: Vec<(String, Arc<dyn Channel>)> = Vec::new();

        if names.is_empty() {
            resolved.extend(
                self.channels
                    .iter()
                    .map(|(name, ch)| (name.clone(), Arc::clone(ch))),
            );
        } else {
            for name in names {
                if resolved.iter().any(|(n, _)| n == name) {
                    continue;
                }
                match self.channels.get(name) {
                    Some(ch) => resolved.push((name.clone(), Arc::clone(ch))),
                    None => {
                        tracing::error!(channel = %name, "Channel not found");
                        report.unknown.push(name.clone());
                    }
                }
            }
        }

        if resolved.is_empty() {
            tracing::error!(alert = %message.alert_name, "Empty channels, message not sent");
            report.empty = true;
            return report;
        }

        let sends = resolved.iter().map(|(name, channel)| async move {
            (name.clone(), channel.send(message).await)
        });

        for (name, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(name),
                Err(e) => {
                    tracing::error!(
                        channel = %name,
                        alert = %message.alert_name,
                        error = %e,
                        "Failed to send message to channel"
                    );
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        report
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Channel returned status {0}")]
    Status(u16),

    #[error("Invalid channel configuration: {0}")]
    Config(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[cfg(test)]
mod tests {
    use super::testing::{FailingChannel, RecordingChannel};
    use super::*;
    use crate::alerts::Level;

    fn registry_with(channels: &[Arc<dyn Channel>]) -> ChannelRegistry {
        let mut registry = ChannelRegistry::new();
        for ch in channels {
            registry.register(Arc::clone(ch));
        }
        registry
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_unknown_channel_is_skipped() {
        let a = RecordingChannel::new("a");
        let b = RecordingChannel::new("b");
        let registry = registry_with(&[
            a.clone() as Arc<dyn Channel>,
            b.clone() as Arc<dyn Channel>,
        ]);

        let msg = Message::new(Level::Error, "disk", "full");
        let report = registry.send(&msg, &names(&["a", "nope", "b"])).await;

        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
        assert_eq!(report.unknown, vec!["nope"]);
        assert_eq!(report.error_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_registry_sends_nothing() {
        let registry = ChannelRegistry::new();
        let msg = Message::new(Level::Warning, "disk", "");
        let report = registry.send(&msg, &[]).await;

        assert!(report.empty);
        assert!(report.delivered.is_empty());
        assert_eq!(report.error_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_channel_is_isolated() {
        let good = RecordingChannel::new("good");
        let registry = registry_with(&[
            FailingChannel::new("bad") as Arc<dyn Channel>,
            good.clone() as Arc<dyn Channel>,
        ]);

        let msg = Message::new(Level::Error, "disk", "");
        let report = registry.send(&msg, &[]).await;

        assert_eq!(good.count(), 1);
        assert_eq!(report.delivered, vec!["good"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
    }

    #[tokio::test]
    async fn test_empty_names_broadcasts_to_all() {
        let a = RecordingChannel::new("a");
        let b = RecordingChannel::new("b");
        let registry = registry_with(&[
            a.clone() as Arc<dyn Channel>,
            b.clone() as Arc<dyn Channel>,
        ]);

        let report = registry.send(&Message::notice("tripwire start"), &[]).await;
        assert_eq!(report.delivered, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_duplicate_names_deliver_once() {
        let a = RecordingChannel::new("a");
        let registry = registry_with(&[a.clone() as Arc<dyn Channel>]);

        let msg = Message::new(Level::Error, "disk", "");
        registry.send(&msg, &names(&["a", "a"])).await;
        assert_eq!(a.count(), 1);
    }
}
