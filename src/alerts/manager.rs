//! Alert raise protocol
//!
//! Every raise checks out the alert record exclusively, decides between a
//! transition notification, a periodic reminder or silence, fans the message
//! out while the record is still held, then commits.

use std::sync::Arc;

use super::level::Level;
use super::message::Message;
use super::metrics::AlertMetrics;
use super::options::RaiseRequest;
use crate::channels::{ChannelRegistry, DispatchReport};
use crate::storage::{Alert, AlertStore, StorageError};

/// Why a notification was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// The stored level changed
    Transition,
    /// Sustained same level reached a multiple of `repeat`
    Reminder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub report: DispatchReport,
}

/// Result of one raise
#[derive(Debug, Clone, PartialEq)]
pub struct RaiseOutcome {
    pub previous: Level,
    pub level: Level,
    pub count: u64,
    pub notification: Option<Notification>,
}

impl RaiseOutcome {
    pub fn is_transition(&self) -> bool {
        self.previous != self.level
    }
}

pub struct AlertManager {
    store: Arc<dyn AlertStore>,
    channels: Arc<ChannelRegistry>,
    metrics: Arc<AlertMetrics>,
}

impl AlertManager {
    pub fn new(store: Arc<dyn AlertStore>, channels: Arc<ChannelRegistry>) -> Self {
        Self {
            store,
            channels,
            metrics: Arc::new(AlertMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<AlertMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Apply one raise. `default_channels` is the invoking script's channel
    /// set, used when the request names none.
    pub async fn raise(
        &self,
        request: RaiseRequest,
        default_channels: &[String],
    ) -> Result<RaiseOutcome, AlertError> {
        let name = request.name();
        let level = request.level();
        let options = request.options();

        self.metrics.record(name, level);

        let channels: &[String] = if options.channels.is_empty() {
            default_channels
        } else {
            &options.channels
        };

        tracing::debug!(
            alert = %name,
            level = %level,
            quiet = options.quiet,
            repeat = options.repeat,
            channels = ?channels,
            "Raise alert"
        );

        let mut handle = self.store.get_or_new(name).await?;
        let previous = handle.level();

        let kind = if previous == level {
            handle.inc();
            options
                .is_reminder_due(handle.count())
                .then_some(NotificationKind::Reminder)
        } else {
            handle.update_level(level);
            (!options.quiet).then_some(NotificationKind::Transition)
        };

        let notification = match kind {
            Some(kind) => {
                let message = Message::new(level, name, request.text())
                    .with_fields(options.fields.clone())
                    .with_image(options.image.clone());
                let report = self.channels.send(&message, channels).await;
                Some(Notification { kind, report })
            }
            None => None,
        };

        let count = handle.count();
        self.store.release(handle).await?;

        Ok(RaiseOutcome {
            previous,
            level,
            count,
            notification,
        })
    }

    pub async fn get(&self, name: &str) -> Result<Option<Alert>, AlertError> {
        Ok(self.store.get(name.trim()).await?)
    }

    pub async fn all(&self) -> Result<Vec<Alert>, AlertError> {
        Ok(self.store.all().await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert name must be provided")]
    MissingName,

    #[error("alert name must be not empty")]
    EmptyName,

    #[error("alert name must be a string")]
    NameNotString,

    #[error("alert text must be a string")]
    TextNotString,

    #[error("options must be a table")]
    OptionsNotTable,

    #[error("wrong options format: {0}")]
    InvalidOptions(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::RaiseOptions;
    use crate::channels::testing::RecordingChannel;
    use crate::channels::Channel;
    use crate::storage::{CoreStorage, MemoryStorage};

    struct Fixture {
        manager: Arc<AlertManager>,
        store: Arc<dyn AlertStore>,
        ops: Arc<RecordingChannel>,
    }

    fn fixture() -> Fixture {
        let storage = MemoryStorage::new("mem");
        let ops = RecordingChannel::new("ops");
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::clone(&ops) as Arc<dyn Channel>);

        let store = storage.alert();
        Fixture {
            manager: Arc::new(AlertManager::new(Arc::clone(&store), Arc::new(registry))),
            store,
            ops,
        }
    }

    fn request(name: &str, level: Level, options: RaiseOptions) -> RaiseRequest {
        RaiseRequest::new(name, "text", level, options).unwrap()
    }

    async fn seed(fx: &Fixture, name: &str, level: Level) {
        fx.manager
            .raise(request(name, level, RaiseOptions::new().with_quiet(true)), &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transition_notifies_once() {
        let fx = fixture();

        let out = fx
            .manager
            .raise(request("disk", Level::Error, RaiseOptions::new()), &[])
            .await
            .unwrap();

        assert!(out.is_transition());
        assert_eq!(out.notification.unwrap().kind, NotificationKind::Transition);
        assert_eq!(fx.ops.count(), 1);
        assert_eq!(fx.ops.messages()[0].alert_name, "disk");
    }

    #[tokio::test]
    async fn test_same_level_without_repeat_is_silent() {
        let fx = fixture();
        seed(&fx, "disk", Level::Warning).await;

        for _ in 0..5 {
            let out = fx
                .manager
                .raise(request("disk", Level::Warning, RaiseOptions::new()), &[])
                .await
                .unwrap();
            assert!(out.notification.is_none());
        }
        assert_eq!(fx.ops.count(), 0);
        let alert = fx.store.get("disk").await.unwrap().unwrap();
        assert_eq!(alert.count, 5);
    }

    #[tokio::test]
    async fn test_repeat_fires_on_multiples_only() {
        let fx = fixture();
        seed(&fx, "disk", Level::Warning).await;

        let mut fired = Vec::new();
        for i in 1..=4 {
            let out = fx
                .manager
                .raise(
                    request("disk", Level::Warning, RaiseOptions::new().with_repeat(3)),
                    &[],
                )
                .await
                .unwrap();
            if let Some(n) = out.notification {
                assert_eq!(n.kind, NotificationKind::Reminder);
                fired.push(i);
            }
        }

        assert_eq!(fired, vec![3]);
        assert_eq!(fx.ops.count(), 1);
    }

    #[tokio::test]
    async fn test_transition_ignores_repeat() {
        let fx = fixture();
        seed(&fx, "disk", Level::Warning).await;

        let out = fx
            .manager
            .raise(
                request("disk", Level::Error, RaiseOptions::new().with_repeat(5)),
                &[],
            )
            .await
            .unwrap();

        assert_eq!(out.previous, Level::Warning);
        assert_eq!(out.count, 0);
        assert_eq!(fx.ops.count(), 1);
    }

    #[tokio::test]
    async fn test_warning_then_error_notifies_on_second_only() {
        let fx = fixture();
        seed(&fx, "disk", Level::Warning).await;
        assert_eq!(fx.ops.count(), 0);

        fx.manager
            .raise(request("disk", Level::Error, RaiseOptions::new()), &[])
            .await
            .unwrap();
        assert_eq!(fx.ops.count(), 1);
    }

    #[tokio::test]
    async fn test_quiet_updates_state_without_dispatch() {
        let fx = fixture();
        let quiet = || RaiseOptions::new().with_quiet(true).with_repeat(1);

        fx.manager
            .raise(request("disk", Level::Error, quiet()), &[])
            .await
            .unwrap();
        fx.manager
            .raise(request("disk", Level::Error, quiet()), &[])
            .await
            .unwrap();

        assert_eq!(fx.ops.count(), 0);
        let alert = fx.store.get("disk").await.unwrap().unwrap();
        assert_eq!(alert.level, Level::Error);
        assert_eq!(alert.count, 1);
    }

    #[tokio::test]
    async fn test_first_success_raise_is_not_a_transition() {
        let fx = fixture();
        let out = fx
            .manager
            .raise(request("disk", Level::Success, RaiseOptions::new()), &[])
            .await
            .unwrap();
        assert!(!out.is_transition());
        assert_eq!(out.count, 1);
        assert_eq!(fx.ops.count(), 0);
    }

    #[tokio::test]
    async fn test_metrics_recorded_even_when_quiet() {
        let fx = fixture();
        seed(&fx, "disk", Level::Error).await;
        assert_eq!(fx.manager.metrics().raises("disk", Level::Error), 1);
    }

    #[tokio::test]
    async fn test_channel_resolution() {
        let storage = MemoryStorage::new("mem");
        let ops = RecordingChannel::new("ops");
        let dev = RecordingChannel::new("dev");
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::clone(&ops) as Arc<dyn Channel>);
        registry.register(Arc::clone(&dev) as Arc<dyn Channel>);
        let manager = AlertManager::new(storage.alert(), Arc::new(registry));

        let defaults = vec!["dev".to_string()];

        // Script defaults apply when the request names no channels
        manager
            .raise(request("a", Level::Error, RaiseOptions::new()), &defaults)
            .await
            .unwrap();
        assert_eq!((ops.count(), dev.count()), (0, 1));

        // Explicit channels win over the defaults
        manager
            .raise(
                request(
                    "b",
                    Level::Error,
                    RaiseOptions::new().with_channels(vec!["ops".to_string()]),
                ),
                &defaults,
            )
            .await
            .unwrap();
        assert_eq!((ops.count(), dev.count()), (1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_raises_do_not_lose_updates() {
        let fx = fixture();
        seed(&fx, "disk", Level::Warning).await;

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let manager = Arc::clone(&fx.manager);
            tasks.push(tokio::spawn(async move {
                manager
                    .raise(request("disk", Level::Warning, RaiseOptions::new()), &[])
                    .await
                    .unwrap()
            }));
        }

        let mut counts = Vec::new();
        for task in tasks {
            counts.push(task.await.unwrap().count);
        }
        counts.sort_unstable();

        // Every raise observed a distinct count: a serial order exists
        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
        let alert = fx.store.get("disk").await.unwrap().unwrap();
        assert_eq!(alert.count, 50);
    }
}
