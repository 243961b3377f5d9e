//! Alert levels, raise requests and the raise protocol
//!
//! The [`AlertManager`] owns the transition/reminder decision and the fan-out
//! to notification channels for every raised alert.

pub mod level;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod options;

pub use level::Level;
pub use manager::{AlertError, AlertManager, Notification, NotificationKind, RaiseOutcome};
pub use message::{Attachment, Message};
pub use metrics::{AlertMetric, AlertMetrics};
pub use options::{RaiseOptions, RaiseRequest};
