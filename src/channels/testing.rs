//! Channel doubles for tests

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Channel, ChannelError};
use crate::alerts::Message;

/// Records every delivered message
pub(crate) struct RecordingChannel {
    name: String,
    messages: Mutex<Vec<Message>>,
}

impl RecordingChannel {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn count(&self) -> usize {
        self.messages.lock().len()
    }

    pub(crate) fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

/// Always fails delivery
pub(crate) struct FailingChannel {
    name: String,
}

impl FailingChannel {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Channel for FailingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn send(&self, _message: &Message) -> Result<(), ChannelError> {
        Err(ChannelError::Delivery("connection refused".to_string()))
    }
}
