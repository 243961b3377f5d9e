//! Raise requests and their options

use super::level::Level;
use super::manager::AlertError;
use super::message::Attachment;

/// Options accepted by a raise call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaiseOptions {
    /// Extra lines appended to the message
    pub fields: Vec<String>,
    /// Target channels; empty means the script's default set
    pub channels: Vec<String>,
    /// Update state without notifying
    pub quiet: bool,
    /// Remind every Nth consecutive same-level raise; 0 disables reminders
    pub repeat: u64,
    pub image: Option<Attachment>,
}

impl RaiseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_repeat(mut self, repeat: u64) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_image(mut self, image: Attachment) -> Self {
        self.image = Some(image);
        self
    }

    /// Reminder test for a same-level raise that brought the count to `count`
    pub fn is_reminder_due(&self, count: u64) -> bool {
        !self.quiet && self.repeat > 0 && count % self.repeat == 0
    }
}

/// A validated raise. The name is trimmed and never empty.
#[derive(Debug, Clone)]
pub struct RaiseRequest {
    name: String,
    text: String,
    level: Level,
    options: RaiseOptions,
}

impl RaiseRequest {
    pub fn new(
        name: &str,
        text: impl Into<String>,
        level: Level,
        options: RaiseOptions,
    ) -> Result<Self, AlertError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AlertError::EmptyName);
        }

        Ok(Self {
            name: name.to_string(),
            text: text.into(),
            level,
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn options(&self) -> &RaiseOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_trimmed() {
        let req = RaiseRequest::new("  disk ", "", Level::Error, RaiseOptions::new()).unwrap();
        assert_eq!(req.name(), "disk");
    }

    #[test]
    fn test_blank_name_rejected() {
        for name in ["", "   ", "\t\n"] {
            let err = RaiseRequest::new(name, "", Level::Error, RaiseOptions::new()).unwrap_err();
            assert!(matches!(err, AlertError::EmptyName));
        }
    }

    #[test]
    fn test_reminder_due() {
        let opts = RaiseOptions::new().with_repeat(3);
        assert!(!opts.is_reminder_due(1));
        assert!(!opts.is_reminder_due(2));
        assert!(opts.is_reminder_due(3));
        assert!(opts.is_reminder_due(6));

        assert!(!RaiseOptions::new().is_reminder_due(3));
        assert!(!opts.with_quiet(true).is_reminder_due(3));
    }
}
