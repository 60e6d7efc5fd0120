//! Concrete channel adapters backed by external providers.

mod email;
mod push;
mod sms;

use std::sync::Arc;

use tracing::info;

pub use email::SmtpEmailAdapter;
pub use push::HttpPushAdapter;
pub use sms::HttpSmsAdapter;

use super::channel::ChannelAdapters;
use crate::config::ProviderConfig;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid sender address {0}")]
    InvalidSender(String),
    #[error("provider transport setup failed: {0}")]
    Transport(String),
}

/// Build an adapter for every provider that has complete configuration.
pub fn adapters_from_config(config: &ProviderConfig) -> Result<ChannelAdapters, ProviderError> {
    let mut adapters = ChannelAdapters::new();

    if let Some(smtp) = &config.smtp {
        adapters = adapters.with(Arc::new(SmtpEmailAdapter::new(smtp)?));
    }
    if let Some(push) = &config.push {
        adapters = adapters.with(Arc::new(HttpPushAdapter::new(push.clone())));
    }
    if let Some(sms) = &config.sms {
        adapters = adapters.with(Arc::new(HttpSmsAdapter::new(sms.clone())));
    }

    info!(channels = ?adapters.configured(), "notification providers configured");
    Ok(adapters)
}
