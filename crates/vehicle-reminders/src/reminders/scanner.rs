use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::channel::Channel;
use super::dispatcher::{ChannelOutcome, DispatchRequest, DispatchResult, NotificationDispatcher};
use super::domain::{Document, DocumentId, PlanStatus};
use super::ledger::{ClaimOutcome, ClaimState, LedgerError, ReminderClaim, ReminderLedger};
use super::milestone::{days_until_expiry, MilestonePolicy, ReminderMilestone};
use super::probe::ProbeRecipient;
use super::store::{AccountStore, DocumentStore, StoreError};

/// Tuning knobs for a scan run.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Upper bound on documents processed at the same time.
    pub concurrency: usize,
    pub policy: MilestonePolicy,
    /// Total attempts (first send included) before a claim is marked permanently failed.
    pub max_attempts: u32,
    /// Minimum age of the last attempt before a claimed milestone is retried.
    pub retry_backoff: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            policy: MilestonePolicy::ExactDay,
            max_attempts: 3,
            retry_backoff: Duration::hours(1),
        }
    }
}

/// Per-document line of a scan report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentScanResult {
    pub document_id: DocumentId,
    #[serde(rename = "reminderType")]
    pub milestone: ReminderMilestone,
    pub success: bool,
    pub notifications_sent: usize,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<ChannelOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub documents_checked: usize,
    /// Milestones claimed for the first time in this run.
    pub notifications_triggered: usize,
    /// Earlier claims re-attempted in this run.
    pub retried: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_notifications_sent: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub results: Vec<DocumentScanResult>,
    pub summary: ScanSummary,
    pub timestamp: DateTime<Utc>,
}

impl ScanReport {
    fn from_results(
        documents_checked: usize,
        results: Vec<DocumentScanResult>,
        now: DateTime<Utc>,
    ) -> Self {
        let successful = results.iter().filter(|result| result.success).count();
        let retried = results.iter().filter(|result| result.attempt > 1).count();
        let summary = ScanSummary {
            documents_checked,
            notifications_triggered: results.len() - retried,
            retried,
            successful,
            failed: results.len() - successful,
            total_notifications_sent: results.iter().map(|result| result.notifications_sent).sum(),
        };
        Self {
            results,
            summary,
            timestamp: now,
        }
    }
}

/// Run-level failure. Everything narrower is reported inside the [`ScanReport`].
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("document store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a single on-demand dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("document {0} not found")]
    DocumentNotFound(String),
    #[error("notification profile for owner {0} not found")]
    ProfileNotFound(String),
    #[error("document {0} has no expiry date")]
    MissingExpiry(String),
    #[error("reminder {milestone} already handled for document {document_id}")]
    AlreadyClaimed {
        document_id: String,
        milestone: ReminderMilestone,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Anything a scheduler can trigger periodically.
#[async_trait]
pub trait ScanRunner: Send + Sync {
    async fn run_scan(&self, now: DateTime<Utc>) -> Result<ScanReport, ScanError>;
}

/// Orchestrates a reminder run: evaluate, claim, dispatch, aggregate.
pub struct DocumentExpiryScanner<D, A, L> {
    documents: Arc<D>,
    accounts: Arc<A>,
    ledger: Arc<L>,
    dispatcher: Arc<NotificationDispatcher>,
    settings: ScanSettings,
}

impl<D, A, L> DocumentExpiryScanner<D, A, L>
where
    D: DocumentStore + 'static,
    A: AccountStore + 'static,
    L: ReminderLedger + 'static,
{
    pub fn new(
        documents: Arc<D>,
        accounts: Arc<A>,
        ledger: Arc<L>,
        dispatcher: Arc<NotificationDispatcher>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            documents,
            accounts,
            ledger,
            dispatcher,
            settings,
        }
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Scan every dated document once. Only a document store failure aborts the run.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<ScanReport, ScanError> {
        let documents = self.documents.documents_with_expiry().map_err(|err| {
            error!(error = %err, "reminder scan aborted: document store unavailable");
            ScanError::Store(err)
        })?;
        let documents_checked = documents.len();

        let due: Vec<(Document, ReminderMilestone)> = documents
            .into_iter()
            .filter_map(|document| {
                let expiry = document.expiry_date?;
                self.settings
                    .policy
                    .evaluate(expiry, now)
                    .map(|milestone| (document, milestone))
            })
            .collect();

        let concurrency = self.settings.concurrency.max(1);
        let mut results: Vec<DocumentScanResult> = stream::iter(due)
            .map(|(document, milestone)| self.claim_and_dispatch(document, milestone, now))
            .buffer_unordered(concurrency)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        let retries = self.retry_pending(now).await;
        results.extend(retries);
        results.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.milestone.cmp(&b.milestone))
        });

        let report = ScanReport::from_results(documents_checked, results, now);
        info!(
            documents_checked = report.summary.documents_checked,
            triggered = report.summary.notifications_triggered,
            retried = report.summary.retried,
            successful = report.summary.successful,
            failed = report.summary.failed,
            sent = report.summary.total_notifications_sent,
            "reminder scan finished"
        );
        Ok(report)
    }

    /// Claim the milestone and dispatch it. `None` means another run already owns it.
    async fn claim_and_dispatch(
        &self,
        document: Document,
        milestone: ReminderMilestone,
        now: DateTime<Utc>,
    ) -> Option<DocumentScanResult> {
        match self.ledger.try_claim(&document.id, milestone, now) {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyClaimed) => {
                debug!(document_id = %document.id.0, %milestone, "reminder already claimed");
                return None;
            }
            Err(err) => {
                warn!(
                    document_id = %document.id.0,
                    %milestone,
                    error = %err,
                    "unable to claim reminder"
                );
                return Some(failed_result(&document.id, milestone, 0, err.to_string()));
            }
        }

        Some(
            self.deliver(&document, milestone, 1, &BTreeSet::new(), now)
                .await,
        )
    }

    /// Retry claims left undelivered by earlier runs once their backoff has elapsed. Claims
    /// attempted at `now` are never picked up, so a run does not retry its own failures.
    async fn retry_pending(&self, now: DateTime<Utc>) -> Vec<DocumentScanResult> {
        let cutoff = now - self.settings.retry_backoff;
        let pending = match self.ledger.retryable(self.settings.max_attempts, cutoff) {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "unable to list retryable reminders");
                return Vec::new();
            }
        };

        stream::iter(pending)
            .map(|claim| self.retry_claim(claim, now))
            .buffer_unordered(self.settings.concurrency.max(1))
            .filter_map(|result| async move { result })
            .collect()
            .await
    }

    async fn retry_claim(
        &self,
        claim: ReminderClaim,
        now: DateTime<Utc>,
    ) -> Option<DocumentScanResult> {
        match self.ledger.begin_retry(&claim, now) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                warn!(
                    document_id = %claim.document_id.0,
                    error = %err,
                    "unable to start reminder retry"
                );
                return None;
            }
        }
        let attempt = claim.attempts + 1;

        let document = match self.documents.document(&claim.document_id) {
            Ok(Some(document)) => document,
            Ok(None) => {
                self.finish(&claim.document_id, claim.milestone, ClaimState::PermanentlyFailed);
                return Some(failed_result(
                    &claim.document_id,
                    claim.milestone,
                    attempt,
                    format!("document {} not found", claim.document_id.0),
                ));
            }
            Err(err) => {
                return Some(self.record_failure(
                    &claim.document_id,
                    claim.milestone,
                    attempt,
                    err.to_string(),
                ));
            }
        };

        let still_ahead = document
            .expiry_date
            .map(|expiry| days_until_expiry(expiry, now) >= 1)
            .unwrap_or(false);
        if !still_ahead {
            info!(
                document_id = %claim.document_id.0,
                milestone = %claim.milestone,
                "document expired before the reminder was delivered, giving up"
            );
            self.finish(&claim.document_id, claim.milestone, ClaimState::PermanentlyFailed);
            return Some(failed_result(
                &claim.document_id,
                claim.milestone,
                attempt,
                format!("document {} has expired", claim.document_id.0),
            ));
        }

        let delivered = match self.ledger.delivered_channels(&claim.document_id, claim.milestone) {
            Ok(delivered) => delivered,
            Err(err) => {
                return Some(self.record_failure(
                    &claim.document_id,
                    claim.milestone,
                    attempt,
                    err.to_string(),
                ));
            }
        };

        Some(
            self.deliver(&document, claim.milestone, attempt, &delivered, now)
                .await,
        )
    }

    /// Load the owner's records, dispatch the remaining channels and persist the outcome.
    async fn deliver(
        &self,
        document: &Document,
        milestone: ReminderMilestone,
        attempt: u32,
        delivered: &BTreeSet<Channel>,
        now: DateTime<Utc>,
    ) -> DocumentScanResult {
        let profile = match self.accounts.profile(&document.owner_id) {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                return self.record_failure(
                    &document.id,
                    milestone,
                    attempt,
                    format!("notification profile for owner {} not found", document.owner_id.0),
                );
            }
            Err(err) => {
                return self.record_failure(&document.id, milestone, attempt, err.to_string())
            }
        };

        let plan = match self.accounts.plan(&document.owner_id) {
            Ok(plan) => plan
                .unwrap_or_else(|| PlanStatus::free(document.owner_id.clone()))
                .effective_at(now),
            Err(err) => {
                return self.record_failure(&document.id, milestone, attempt, err.to_string())
            }
        };

        let vehicle = self
            .documents
            .vehicle(&document.vehicle_id)
            .unwrap_or_else(|err| {
                warn!(
                    vehicle_id = %document.vehicle_id.0,
                    error = %err,
                    "vehicle lookup failed, using generic copy"
                );
                None
            });

        let result = self
            .dispatcher
            .dispatch_excluding(
                DispatchRequest {
                    document,
                    vehicle: vehicle.as_ref(),
                    profile: &profile,
                    plan: &plan,
                    milestone,
                    now,
                },
                delivered,
            )
            .await;

        self.persist(&result, attempt, now);

        DocumentScanResult {
            document_id: document.id.clone(),
            milestone,
            success: result.is_success(),
            notifications_sent: result.summary.succeeded,
            attempt,
            error: None,
            notifications: result.outcomes,
        }
    }

    fn persist(&self, result: &DispatchResult, attempt: u32, now: DateTime<Utc>) {
        for channel in result.delivered_channels() {
            if let Err(err) =
                self.ledger
                    .record_delivery(&result.document_id, result.milestone, channel, now)
            {
                warn!(
                    document_id = %result.document_id.0,
                    %channel,
                    error = %err,
                    "unable to record delivery"
                );
            }
        }

        if result.is_success() {
            self.finish(&result.document_id, result.milestone, ClaimState::Delivered);
        } else if attempt >= self.settings.max_attempts {
            self.finish(&result.document_id, result.milestone, ClaimState::PermanentlyFailed);
        }
    }

    fn record_failure(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        attempt: u32,
        reason: String,
    ) -> DocumentScanResult {
        warn!(
            document_id = %document_id.0,
            %milestone,
            attempt,
            error = %reason,
            "reminder dispatch failed"
        );
        if attempt >= self.settings.max_attempts {
            self.finish(document_id, milestone, ClaimState::PermanentlyFailed);
        }
        failed_result(document_id, milestone, attempt, reason)
    }

    fn finish(&self, document_id: &DocumentId, milestone: ReminderMilestone, state: ClaimState) {
        if let Err(err) = self.ledger.finish(document_id, milestone, state) {
            warn!(
                document_id = %document_id.0,
                %milestone,
                %state,
                error = %err,
                "unable to update claim state"
            );
        }
    }

    /// Dispatch one milestone for one document on demand. The milestone is claimed first, so
    /// a reminder that a scan already handled is refused.
    pub async fn dispatch_document(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        now: DateTime<Utc>,
    ) -> Result<(Document, DispatchResult), DispatchError> {
        let document = self
            .documents
            .document(document_id)?
            .ok_or_else(|| DispatchError::DocumentNotFound(document_id.0.clone()))?;
        if document.expiry_date.is_none() {
            return Err(DispatchError::MissingExpiry(document_id.0.clone()));
        }

        let profile = self
            .accounts
            .profile(&document.owner_id)?
            .ok_or_else(|| DispatchError::ProfileNotFound(document.owner_id.0.clone()))?;
        let plan = self
            .accounts
            .plan(&document.owner_id)?
            .unwrap_or_else(|| PlanStatus::free(document.owner_id.clone()))
            .effective_at(now);
        let vehicle = self.documents.vehicle(&document.vehicle_id)?;

        if self.ledger.try_claim(&document.id, milestone, now)? == ClaimOutcome::AlreadyClaimed {
            return Err(DispatchError::AlreadyClaimed {
                document_id: document.id.0.clone(),
                milestone,
            });
        }

        let result = self
            .dispatcher
            .dispatch(DispatchRequest {
                document: &document,
                vehicle: vehicle.as_ref(),
                profile: &profile,
                plan: &plan,
                milestone,
                now,
            })
            .await;
        self.persist(&result, 1, now);

        Ok((document, result))
    }

    /// Send a synthetic reminder to the configured probe recipient. The ledger is not touched.
    pub async fn dispatch_probe(
        &self,
        probe: &ProbeRecipient,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        now: DateTime<Utc>,
    ) -> (Document, DispatchResult) {
        let fixture = probe.fixture(document_id, milestone, now);
        info!(document_id = %document_id.0, %milestone, "dispatching test reminder");
        let result = self
            .dispatcher
            .dispatch(DispatchRequest {
                document: &fixture.document,
                vehicle: Some(&fixture.vehicle),
                profile: &fixture.profile,
                plan: &fixture.plan,
                milestone,
                now,
            })
            .await;
        (fixture.document, result)
    }
}

#[async_trait]
impl<D, A, L> ScanRunner for DocumentExpiryScanner<D, A, L>
where
    D: DocumentStore + 'static,
    A: AccountStore + 'static,
    L: ReminderLedger + 'static,
{
    async fn run_scan(&self, now: DateTime<Utc>) -> Result<ScanReport, ScanError> {
        self.scan(now).await
    }
}

fn failed_result(
    document_id: &DocumentId,
    milestone: ReminderMilestone,
    attempt: u32,
    reason: String,
) -> DocumentScanResult {
    DocumentScanResult {
        document_id: document_id.clone(),
        milestone,
        success: false,
        notifications_sent: 0,
        attempt,
        error: Some(reason),
        notifications: Vec::new(),
    }
}
