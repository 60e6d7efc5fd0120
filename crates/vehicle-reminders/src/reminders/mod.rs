//! Document expiry reminders.
//!
//! A scan walks every dated vehicle document, works out which reminder milestone (28, 21, 14,
//! 7 or 1 day before expiry) is due, claims it in the ledger and fans the reminder out over
//! the channels the owner's plan and preferences allow. The ledger claim is what keeps a
//! milestone from being sent twice across overlapping or repeated runs.

pub mod channel;
pub mod dispatcher;
pub mod domain;
pub mod gate;
pub mod ledger;
pub mod milestone;
pub mod probe;
pub mod providers;
pub mod router;
pub mod scanner;
pub mod scheduler;
pub mod sqlite;
pub mod store;
pub mod template;

#[cfg(test)]
mod tests;

pub use channel::{
    Ack, Channel, ChannelAdapter, ChannelAdapters, ChannelMessage, Recipient, SendError,
};
pub use dispatcher::{
    ChannelOutcome, DispatchRequest, DispatchResult, DispatchSummary, NotificationDispatcher,
    DEFAULT_SEND_TIMEOUT,
};
pub use domain::{
    Document, DocumentId, DocumentType, OwnerId, PlanStatus, PlanTier, UserNotificationProfile,
    Vehicle, VehicleId,
};
pub use ledger::{
    ClaimOutcome, ClaimState, InMemoryLedger, LedgerError, ReminderClaim, ReminderLedger,
};
pub use milestone::{
    days_until_expiry, evaluate, MilestonePolicy, ReminderMilestone, UnknownMilestone,
};
pub use probe::ProbeRecipient;
pub use providers::{adapters_from_config, ProviderError};
pub use router::{reminder_router, ReminderApi};
pub use scanner::{
    DispatchError, DocumentExpiryScanner, DocumentScanResult, ScanError, ScanReport, ScanRunner,
    ScanSettings, ScanSummary,
};
pub use scheduler::ScanScheduler;
pub use sqlite::SqliteLedger;
pub use store::{
    AccountStore, DocumentStore, InMemoryDirectory, ReminderSeed, SeedError, StoreError,
};
