use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use super::channel::{Channel, ChannelAdapters, ChannelMessage, Recipient, SendError};
use super::domain::{Document, DocumentId, PlanStatus, UserNotificationProfile, Vehicle};
use super::gate;
use super::milestone::{days_until_expiry, ReminderMilestone};
use super::template::{self, ReminderContext};

/// Default upper bound for a single provider call.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to notify one owner about one due milestone.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub document: &'a Document,
    pub vehicle: Option<&'a Vehicle>,
    pub profile: &'a UserNotificationProfile,
    pub plan: &'a PlanStatus,
    pub milestone: ReminderMilestone,
    /// Clock the copy is rendered against.
    pub now: DateTime<Utc>,
}

/// Outcome of one channel send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelOutcome {
    #[serde(rename = "type")]
    pub channel: Channel,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelOutcome {
    fn delivered(channel: Channel) -> Self {
        Self {
            channel,
            success: true,
            error: None,
        }
    }

    fn failed(channel: Channel, error: &SendError) -> Self {
        Self {
            channel,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub document_id: DocumentId,
    pub milestone: ReminderMilestone,
    pub outcomes: Vec<ChannelOutcome>,
    /// Channels excluded because a previous attempt already delivered them.
    pub already_delivered: Vec<Channel>,
    pub summary: DispatchSummary,
}

impl DispatchResult {
    pub fn delivered_channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.success)
            .map(|outcome| outcome.channel)
    }

    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
    }
}

/// Renders the per-channel payloads for a reminder and fans them out to the adapters.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    adapters: ChannelAdapters,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(adapters: ChannelAdapters, send_timeout: Duration) -> Self {
        Self {
            adapters,
            send_timeout,
        }
    }

    pub fn adapters(&self) -> &ChannelAdapters {
        &self.adapters
    }

    pub async fn dispatch(&self, request: DispatchRequest<'_>) -> DispatchResult {
        self.dispatch_excluding(request, &BTreeSet::new()).await
    }

    /// Dispatch to every eligible channel not present in `already_delivered`. All sends run
    /// concurrently; a failing channel never affects its siblings.
    pub async fn dispatch_excluding(
        &self,
        request: DispatchRequest<'_>,
        already_delivered: &BTreeSet<Channel>,
    ) -> DispatchResult {
        let DispatchRequest {
            document,
            vehicle,
            profile,
            plan,
            milestone,
            now,
        } = request;

        let eligible = gate::eligible_channels(plan, profile);
        let (skipped, pending): (Vec<Channel>, Vec<Channel>) = eligible
            .into_iter()
            .partition(|channel| already_delivered.contains(channel));

        let ctx = ReminderContext {
            document,
            vehicle,
            profile,
            days_left: document
                .expiry_date
                .map(|expiry| days_until_expiry(expiry, now))
                .unwrap_or_else(|| milestone.days()),
        };
        let recipient = Recipient::from(profile);

        let sends = pending.into_iter().map(|channel| {
            let message = template::render(channel, &ctx);
            self.send_one(channel, &recipient, message, &document.id, milestone)
        });
        let outcomes = join_all(sends).await;

        let succeeded = outcomes.iter().filter(|outcome| outcome.success).count();
        let summary = DispatchSummary {
            attempted: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
        };

        DispatchResult {
            document_id: document.id.clone(),
            milestone,
            outcomes,
            already_delivered: skipped,
            summary,
        }
    }

    async fn send_one(
        &self,
        channel: Channel,
        recipient: &Recipient,
        message: ChannelMessage,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
    ) -> ChannelOutcome {
        let result = match self.adapters.get(channel) {
            None => Err(SendError::NotConfigured(channel)),
            Some(adapter) => {
                match tokio::time::timeout(self.send_timeout, adapter.send(recipient, &message))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SendError::TimedOut(self.send_timeout)),
                }
            }
        };

        match result {
            Ok(ack) => {
                debug!(
                    document_id = %document_id.0,
                    %milestone,
                    %channel,
                    provider_message_id = ?ack.provider_message_id,
                    "reminder sent"
                );
                ChannelOutcome::delivered(channel)
            }
            Err(error) => {
                warn!(
                    document_id = %document_id.0,
                    %milestone,
                    %channel,
                    %error,
                    "reminder send failed"
                );
                ChannelOutcome::failed(channel, &error)
            }
        }
    }
}
