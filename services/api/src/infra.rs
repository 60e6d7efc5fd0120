use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};
use vehicle_reminders::config::AppConfig;
use vehicle_reminders::error::AppError;
use vehicle_reminders::reminders::{
    adapters_from_config, Channel, ClaimOutcome, ClaimState, DocumentExpiryScanner, DocumentId,
    InMemoryDirectory, InMemoryLedger, LedgerError, NotificationDispatcher, ReminderApi,
    ReminderClaim, ReminderLedger, ReminderMilestone, ReminderSeed, SqliteLedger,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Ledger selected at startup: SQLite when a database path is configured, memory otherwise.
pub(crate) enum LedgerBackend {
    Memory(InMemoryLedger),
    Sqlite(SqliteLedger),
}

impl LedgerBackend {
    fn inner(&self) -> &dyn ReminderLedger {
        match self {
            LedgerBackend::Memory(ledger) => ledger,
            LedgerBackend::Sqlite(ledger) => ledger,
        }
    }
}

impl ReminderLedger for LedgerBackend {
    fn try_claim(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        at: DateTime<Utc>,
    ) -> Result<ClaimOutcome, LedgerError> {
        self.inner().try_claim(document_id, milestone, at)
    }

    fn claim(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
    ) -> Result<Option<ReminderClaim>, LedgerError> {
        self.inner().claim(document_id, milestone)
    }

    fn retryable(
        &self,
        max_attempts: u32,
        attempted_before: DateTime<Utc>,
    ) -> Result<Vec<ReminderClaim>, LedgerError> {
        self.inner().retryable(max_attempts, attempted_before)
    }

    fn begin_retry(&self, claim: &ReminderClaim, at: DateTime<Utc>) -> Result<bool, LedgerError> {
        self.inner().begin_retry(claim, at)
    }

    fn record_delivery(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.inner()
            .record_delivery(document_id, milestone, channel, at)
    }

    fn delivered_channels(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
    ) -> Result<BTreeSet<Channel>, LedgerError> {
        self.inner().delivered_channels(document_id, milestone)
    }

    fn finish(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        state: ClaimState,
    ) -> Result<(), LedgerError> {
        self.inner().finish(document_id, milestone, state)
    }
}

pub(crate) type ServiceApi = ReminderApi<InMemoryDirectory, InMemoryDirectory, LedgerBackend>;

/// Assemble stores, ledger, provider adapters and scanner from configuration.
pub(crate) fn build_reminder_api(config: &AppConfig) -> Result<Arc<ServiceApi>, AppError> {
    let settings = &config.reminders;

    let directory = match &settings.seed_path {
        Some(path) => {
            let seed = ReminderSeed::from_path(path)?;
            info!(
                path = %path.display(),
                documents = seed.documents.len(),
                "loaded reminder seed"
            );
            InMemoryDirectory::from_seed(seed)
        }
        None => {
            warn!("REMINDER_SEED_PATH not set, starting with an empty document directory");
            InMemoryDirectory::new()
        }
    };
    let directory = Arc::new(directory);

    let ledger = match &settings.database_path {
        Some(path) => {
            info!(path = %path.display(), "using sqlite reminder ledger");
            LedgerBackend::Sqlite(SqliteLedger::open(path)?)
        }
        None => {
            warn!("REMINDER_DATABASE_PATH not set, reminder claims will not survive a restart");
            LedgerBackend::Memory(InMemoryLedger::new())
        }
    };

    let adapters = adapters_from_config(&config.providers)?;
    let dispatcher = Arc::new(NotificationDispatcher::new(
        adapters,
        settings.channel_timeout,
    ));

    let scanner = DocumentExpiryScanner::new(
        directory.clone(),
        directory,
        Arc::new(ledger),
        dispatcher,
        settings.scan_settings(),
    );

    Ok(Arc::new(ReminderApi {
        scanner: Arc::new(scanner),
        probe: config.probe.clone(),
    }))
}
