use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{OwnerId, UserNotificationProfile};

/// Notification transports a reminder can go out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
    Sms,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Push, Channel::Sms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
            Channel::Sms => "sms",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "email" => Ok(Channel::Email),
            "push" => Ok(Channel::Push),
            "sms" => Ok(Channel::Sms),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

/// Addressing details handed to an adapter; each adapter picks the field it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub owner_id: OwnerId,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl From<&UserNotificationProfile> for Recipient {
    fn from(profile: &UserNotificationProfile) -> Self {
        Self {
            owner_id: profile.owner_id.clone(),
            full_name: profile.full_name.clone(),
            email: profile.email.clone(),
            phone: profile.phone.clone(),
        }
    }
}

/// Rendered payload for a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Email { subject: String, body: String },
    Push { title: String, body: String },
    Sms { body: String },
}

impl ChannelMessage {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelMessage::Email { .. } => Channel::Email,
            ChannelMessage::Push { .. } => Channel::Push,
            ChannelMessage::Sms { .. } => Channel::Sms,
        }
    }
}

/// Provider acknowledgement for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("{0} channel is not configured")]
    NotConfigured(Channel),
    #[error("recipient has no {0} destination")]
    MissingDestination(Channel),
    #[error("{channel} adapter cannot send a {payload} payload")]
    PayloadMismatch { channel: Channel, payload: Channel },
    #[error("provider rejected message: {0}")]
    Rejected(String),
    #[error("provider transport failed: {0}")]
    Transport(String),
    #[error("send timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// One external provider for one channel.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, recipient: &Recipient, message: &ChannelMessage) -> Result<Ack, SendError>;
}

/// Adapters injected into the dispatcher, at most one per channel.
#[derive(Clone, Default)]
pub struct ChannelAdapters {
    adapters: BTreeMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelAdapters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous adapter for the same channel.
    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel)
    }

    pub fn configured(&self) -> Vec<Channel> {
        self.adapters.keys().copied().collect()
    }
}

impl fmt::Debug for ChannelAdapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAdapters")
            .field("configured", &self.configured())
            .finish()
    }
}
