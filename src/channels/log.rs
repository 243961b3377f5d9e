//! Channel that writes notifications to the process log

use async_trait::async_trait;

use super::{Channel, ChannelError};
use crate::alerts::{Level, Message};

pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let rendered = message.render();
        match message.level {
            Some(Level::Error) => tracing::error!(
                channel = %self.name,
                alert = %message.alert_name,
                "{}",
                rendered
            ),
            Some(Level::Warning) => tracing::warn!(
                channel = %self.name,
                alert = %message.alert_name,
                "{}",
                rendered
            ),
            _ => tracing::info!(
                channel = %self.name,
                alert = %message.alert_name,
                "{}",
                rendered
            ),
        }
        Ok(())
    }
}
