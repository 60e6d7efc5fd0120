use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::reminders::channel::{
    Ack, Channel, ChannelAdapter, ChannelAdapters, ChannelMessage, Recipient, SendError,
};
use crate::reminders::dispatcher::{NotificationDispatcher, DEFAULT_SEND_TIMEOUT};
use crate::reminders::domain::{
    Document, DocumentId, DocumentType, OwnerId, PlanStatus, PlanTier, UserNotificationProfile,
    Vehicle, VehicleId,
};
use crate::reminders::ledger::InMemoryLedger;
use crate::reminders::scanner::{DocumentExpiryScanner, ScanSettings};
use crate::reminders::store::{AccountStore, DocumentStore, InMemoryDirectory, StoreError};

/// Fixed scan instant: 2025-05-01 09:00 UTC.
pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap()
}

pub(crate) fn vehicle() -> Vehicle {
    Vehicle {
        id: VehicleId("veh-1".to_string()),
        make: "Toyota".to_string(),
        model: "Corolla".to_string(),
        year: Some(2019),
        license_plate: Some("B-123-XYZ".to_string()),
    }
}

pub(crate) fn owned_document(id: &str, owner: &str, days_from_now: i64) -> Document {
    Document {
        id: DocumentId(id.to_string()),
        owner_id: OwnerId(owner.to_string()),
        vehicle_id: VehicleId("veh-1".to_string()),
        document_type: DocumentType::Insurance,
        expiry_date: Some((now() + chrono::Duration::days(days_from_now)).date_naive()),
        title: "RCA policy".to_string(),
    }
}

/// Insurance document for `user-1` expiring `days_from_now` days after [`now`].
pub(crate) fn insurance_document(id: &str, days_from_now: i64) -> Document {
    owned_document(id, "user-1", days_from_now)
}

pub(crate) fn full_profile(owner: &str) -> UserNotificationProfile {
    UserNotificationProfile {
        owner_id: OwnerId(owner.to_string()),
        full_name: "Ana Driver".to_string(),
        email: Some(format!("{owner}@example.com")),
        phone: Some("+40700000001".to_string()),
        email_enabled: true,
        push_enabled: true,
        sms_enabled: true,
    }
}

pub(crate) fn plan(owner: &str, tier: PlanTier, active: bool) -> PlanStatus {
    PlanStatus {
        owner_id: OwnerId(owner.to_string()),
        tier,
        active,
        current_period_end: None,
    }
}

/// Messages captured by the recording adapters, in send order.
#[derive(Default)]
pub(crate) struct SentLog {
    entries: Mutex<Vec<(OwnerId, ChannelMessage)>>,
}

impl SentLog {
    fn push(&self, owner: OwnerId, message: ChannelMessage) {
        self.entries.lock().unwrap().push((owner, message));
    }

    /// Channels that received a message, sorted.
    pub(crate) fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.channel())
            .collect();
        channels.sort();
        channels
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub(crate) fn messages(&self) -> Vec<ChannelMessage> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

pub(crate) struct RecordingAdapter {
    channel: Channel,
    log: Arc<SentLog>,
}

impl RecordingAdapter {
    pub(crate) fn new(channel: Channel, log: Arc<SentLog>) -> Self {
        Self { channel, log }
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &ChannelMessage,
    ) -> Result<Ack, SendError> {
        self.log.push(recipient.owner_id.clone(), message.clone());
        Ok(Ack {
            provider_message_id: Some(format!("{}-{}", self.channel, self.log.len())),
        })
    }
}

pub(crate) struct FailingAdapter {
    channel: Channel,
}

impl FailingAdapter {
    pub(crate) fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelAdapter for FailingAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, _: &Recipient, _: &ChannelMessage) -> Result<Ack, SendError> {
        Err(SendError::Transport("smtp down".to_string()))
    }
}

/// Fails until `failures` sends have been attempted, then records like [`RecordingAdapter`].
pub(crate) struct FlakyAdapter {
    channel: Channel,
    remaining_failures: Mutex<u32>,
    log: Arc<SentLog>,
}

impl FlakyAdapter {
    pub(crate) fn new(channel: Channel, failures: u32, log: Arc<SentLog>) -> Self {
        Self {
            channel,
            remaining_failures: Mutex::new(failures),
            log,
        }
    }
}

#[async_trait]
impl ChannelAdapter for FlakyAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &ChannelMessage,
    ) -> Result<Ack, SendError> {
        {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SendError::Transport("provider flapping".to_string()));
            }
        }
        self.log.push(recipient.owner_id.clone(), message.clone());
        Ok(Ack::default())
    }
}

pub(crate) struct SlowAdapter {
    channel: Channel,
    delay: Duration,
}

impl SlowAdapter {
    pub(crate) fn new(channel: Channel, delay: Duration) -> Self {
        Self { channel, delay }
    }
}

#[async_trait]
impl ChannelAdapter for SlowAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, _: &Recipient, _: &ChannelMessage) -> Result<Ack, SendError> {
        tokio::time::sleep(self.delay).await;
        Ok(Ack::default())
    }
}

/// One recording adapter per channel sharing a single log.
pub(crate) fn recording_adapters() -> (ChannelAdapters, Arc<SentLog>) {
    let log = Arc::new(SentLog::default());
    let adapters = Channel::ALL.iter().fold(ChannelAdapters::new(), |adapters, channel| {
        adapters.with(Arc::new(RecordingAdapter::new(*channel, log.clone())))
    });
    (adapters, log)
}

/// Directory with the shared vehicle and a fully opted-in `user-1` on the given plan.
pub(crate) fn directory(tier: PlanTier, active: bool) -> Arc<InMemoryDirectory> {
    let directory = InMemoryDirectory::new();
    directory.upsert_vehicle(vehicle()).unwrap();
    directory.upsert_profile(full_profile("user-1")).unwrap();
    directory.upsert_plan(plan("user-1", tier, active)).unwrap();
    Arc::new(directory)
}

pub(crate) type MemoryScanner =
    DocumentExpiryScanner<InMemoryDirectory, InMemoryDirectory, InMemoryLedger>;

pub(crate) fn scanner(
    directory: Arc<InMemoryDirectory>,
    ledger: Arc<InMemoryLedger>,
    adapters: ChannelAdapters,
) -> MemoryScanner {
    scanner_with(directory, ledger, adapters, ScanSettings::default())
}

pub(crate) fn scanner_with(
    directory: Arc<InMemoryDirectory>,
    ledger: Arc<InMemoryLedger>,
    adapters: ChannelAdapters,
    settings: ScanSettings,
) -> MemoryScanner {
    DocumentExpiryScanner::new(
        directory.clone(),
        directory,
        ledger,
        Arc::new(NotificationDispatcher::new(adapters, DEFAULT_SEND_TIMEOUT)),
        settings,
    )
}

/// Store double whose every read fails.
pub(crate) struct UnavailableStore;

impl DocumentStore for UnavailableStore {
    fn documents_with_expiry(&self) -> Result<Vec<Document>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn document(&self, _: &DocumentId) -> Result<Option<Document>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn vehicle(&self, _: &VehicleId) -> Result<Option<Vehicle>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

impl AccountStore for UnavailableStore {
    fn profile(&self, _: &OwnerId) -> Result<Option<UserNotificationProfile>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn plan(&self, _: &OwnerId) -> Result<Option<PlanStatus>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

pub(crate) async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}
