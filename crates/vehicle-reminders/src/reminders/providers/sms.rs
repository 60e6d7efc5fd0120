use async_trait::async_trait;
use serde_json::Value;

use crate::config::SmsConfig;
use crate::reminders::channel::{Ack, Channel, ChannelAdapter, ChannelMessage, Recipient, SendError};

/// SMS delivery through a Twilio-compatible messages API.
pub struct HttpSmsAdapter {
    client: reqwest::Client,
    config: SmsConfig,
}

impl HttpSmsAdapter {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.endpoint.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl ChannelAdapter for HttpSmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &ChannelMessage,
    ) -> Result<Ack, SendError> {
        let ChannelMessage::Sms { body } = message else {
            return Err(SendError::PayloadMismatch {
                channel: Channel::Sms,
                payload: message.channel(),
            });
        };
        let phone = recipient
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
            .ok_or(SendError::MissingDestination(Channel::Sms))?;

        let form = [
            ("To", phone),
            ("From", self.config.from.as_str()),
            ("Body", body.as_str()),
        ];
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|err| SendError::Transport(format!("sms gateway: {err}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SendError::Rejected(format!("sms gateway {status}: {body}")));
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok(Ack {
            provider_message_id: body["sid"].as_str().map(str::to_string),
        })
    }
}
