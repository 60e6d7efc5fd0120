use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::ProviderError;
use crate::config::SmtpConfig;
use crate::reminders::channel::{Ack, Channel, ChannelAdapter, ChannelMessage, Recipient, SendError};

/// Email delivery over an authenticated STARTTLS SMTP relay.
pub struct SmtpEmailAdapter {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailAdapter {
    pub fn new(config: &SmtpConfig) -> Result<Self, ProviderError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|err| ProviderError::InvalidSender(format!("{}: {err}", config.from)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|err| ProviderError::Transport(format!("SMTP relay {}: {err}", config.host)))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl ChannelAdapter for SmtpEmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &ChannelMessage,
    ) -> Result<Ack, SendError> {
        let ChannelMessage::Email { subject, body } = message else {
            return Err(SendError::PayloadMismatch {
                channel: Channel::Email,
                payload: message.channel(),
            });
        };

        let address = recipient
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or(SendError::MissingDestination(Channel::Email))?
            .parse::<Address>()
            .map_err(|err| SendError::Rejected(format!("invalid email address: {err}")))?;
        let name = Some(recipient.full_name.clone()).filter(|name| !name.trim().is_empty());

        let email = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(name, address))
            .subject(subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(body.clone())
            .map_err(|err| SendError::Rejected(format!("unable to build email: {err}")))?;

        let response = self
            .transport
            .send(email)
            .await
            .map_err(|err| SendError::Transport(format!("SMTP send: {err}")))?;

        let provider_message_id = response.message().next().map(str::to_string);
        info!(owner_id = %recipient.owner_id.0, "reminder email accepted by relay");
        Ok(Ack {
            provider_message_id,
        })
    }
}
