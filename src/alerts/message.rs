//! Notification message delivered to channels

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::level::Level;

/// Binary payload attached to a notification (e.g. a rendered chart)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub content_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }

    /// Guess the content type from the payload: SVG and PNG are recognized.
    pub fn sniff(data: Vec<u8>) -> Self {
        let content_type = if data.starts_with(b"\x89PNG") {
            "image/png"
        } else if data.starts_with(b"<svg") || data.starts_with(b"<?xml") {
            "image/svg+xml"
        } else {
            "application/octet-stream"
        };
        Self::new(content_type, data)
    }
}

/// A rendered alert notification
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// `None` for engine lifecycle messages (start/stop)
    pub level: Option<Level>,
    pub alert_name: String,
    pub text: String,
    pub fields: Vec<String>,
    pub image: Option<Attachment>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(level: Level, alert_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            level: Some(level),
            alert_name: alert_name.into(),
            text: text.into(),
            fields: Vec::new(),
            image: None,
            timestamp: Utc::now(),
        }
    }

    /// Message without a severity, used for engine start/stop notices
    pub fn notice(text: impl Into<String>) -> Self {
        Self {
            level: None,
            alert_name: String::new(),
            text: text.into(),
            fields: Vec::new(),
            image: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_image(mut self, image: Option<Attachment>) -> Self {
        self.image = image;
        self
    }

    /// Plain-text rendering shared by text-based channels
    pub fn render(&self) -> String {
        let mut out = match self.level {
            Some(level) => format!("[{}] {}", level.as_str().to_uppercase(), self.alert_name),
            None => String::new(),
        };
        if !self.text.is_empty() {
            if !out.is_empty() {
                out.push_str(": ");
            }
            out.push_str(&self.text);
        }
        for field in &self.fields {
            out.push('\n');
            out.push_str(field);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_fields() {
        let msg = Message::new(Level::Error, "disk", "90% used")
            .with_fields(vec!["host=db1".to_string(), "mount=/".to_string()]);
        assert_eq!(msg.render(), "[ERROR] disk: 90% used\nhost=db1\nmount=/");
    }

    #[test]
    fn test_render_notice() {
        assert_eq!(Message::notice("tripwire start").render(), "tripwire start");
    }

    #[test]
    fn test_sniff_svg() {
        let a = Attachment::sniff(b"<svg xmlns=\"\"></svg>".to_vec());
        assert_eq!(a.content_type, "image/svg+xml");
    }
}
