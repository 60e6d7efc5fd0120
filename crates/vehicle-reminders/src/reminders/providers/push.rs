use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::PushConfig;
use crate::reminders::channel::{Ack, Channel, ChannelAdapter, ChannelMessage, Recipient, SendError};

/// Push delivery through a OneSignal-style REST gateway, addressed by the owner's external id.
pub struct HttpPushAdapter {
    client: reqwest::Client,
    config: PushConfig,
}

impl HttpPushAdapter {
    pub fn new(config: PushConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn payload(&self, recipient: &Recipient, title: &str, body: &str) -> Value {
        let external_id = &recipient.owner_id.0;
        json!({
            "app_id": self.config.app_id,
            "target_channel": "push",
            "include_aliases": { "external_id": [external_id] },
            "headings": { "en": title },
            "contents": { "en": body },
        })
    }
}

#[async_trait]
impl ChannelAdapter for HttpPushAdapter {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &ChannelMessage,
    ) -> Result<Ack, SendError> {
        let ChannelMessage::Push { title, body } = message else {
            return Err(SendError::PayloadMismatch {
                channel: Channel::Push,
                payload: message.channel(),
            });
        };

        let resp = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Key {}", self.config.api_key))
            .json(&self.payload(recipient, title, body))
            .send()
            .await
            .map_err(|err| SendError::Transport(format!("push gateway: {err}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SendError::Rejected(format!("push gateway {status}: {body}")));
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if let Some(errors) = body.get("errors").filter(|errors| !errors.is_null()) {
            return Err(SendError::Rejected(format!("push gateway errors: {errors}")));
        }

        Ok(Ack {
            provider_message_id: body["id"].as_str().map(str::to_string),
        })
    }
}
