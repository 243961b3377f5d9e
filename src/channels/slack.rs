//! Slack incoming-webhook channel

use async_trait::async_trait;

use super::{Channel, ChannelError};
use crate::alerts::{Level, Message};
use crate::config::SlackChannelConfig;

pub struct SlackChannel {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(config: &SlackChannelConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChannelError::Config(format!("{}: {}", config.name, e)))?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client,
        })
    }

    pub fn payload(message: &Message) -> serde_json::Value {
        let color = match message.level {
            Some(Level::Error) => "danger",
            Some(Level::Warning) => "warning",
            Some(Level::Success) => "good",
            None => "#439FE0",
        };

        serde_json::json!({
            "text": message.render(),
            "attachments": [{
                "color": color,
                "ts": message.timestamp.timestamp(),
            }],
        })
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::payload(message))
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("Failed to post to slack: {}", e)))?;

        if !response.status().is_success() {
            return Err(ChannelError::Status(response.status().as_u16()));
        }

        Ok(())
    }
}
