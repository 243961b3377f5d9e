//! Generic JSON webhook channel

use std::collections::HashMap;

use async_trait::async_trait;

use super::{Channel, ChannelError};
use crate::alerts::Message;
use crate::config::WebhookChannelConfig;

pub struct WebhookChannel {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: &WebhookChannelConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChannelError::Config(format!("{}: {}", config.name, e)))?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            headers: config.headers.clone(),
            client,
        })
    }

    /// Request body posted to the webhook
    pub fn payload(message: &Message) -> serde_json::Value {
        let image = message.image.as_ref().map(|image| {
            serde_json::json!({
                "content_type": image.content_type,
                "data": base64::encode(&image.data),
            })
        });

        serde_json::json!({
            "level": message.level,
            "alert_name": message.alert_name,
            "text": message.text,
            "fields": message.fields,
            "image": image,
            "timestamp": message.timestamp.to_rfc3339(),
        })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let mut request = self.client.post(&self.url).json(&Self::payload(message));

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(ChannelError::Status(response.status().as_u16()));
        }

        tracing::debug!(
            channel = %self.name,
            alert = %message.alert_name,
            "Webhook notification sent"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Attachment, Level};

    #[test]
    fn test_payload_shape() {
        let msg = Message::new(Level::Warning, "disk", "80%")
            .with_fields(vec!["host=db1".to_string()])
            .with_image(Some(Attachment::new("image/svg+xml", b"<svg/>".to_vec())));

        let payload = WebhookChannel::payload(&msg);
        assert_eq!(payload["level"], "warning");
        assert_eq!(payload["alert_name"], "disk");
        assert_eq!(payload["fields"][0], "host=db1");
        assert_eq!(payload["image"]["content_type"], "image/svg+xml");
        assert_eq!(payload["image"]["data"], base64::encode(b"<svg/>"));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_fails() {
        let config = WebhookChannelConfig {
            name: "hook".to_string(),
            url: "http://127.0.0.1:1/hook".to_string(),
            headers: HashMap::new(),
            timeout: std::time::Duration::from_secs(1),
        };
        let channel = WebhookChannel::new(&config).unwrap();
        let result = channel
            .send(&Message::new(Level::Error, "disk", ""))
            .await;
        assert!(matches!(result, Err(ChannelError::Http(_))));
    }
}
