//! Deduplication ledger: the write-once record of milestones handled per document.
//!
//! A claim row is inserted before any send is attempted and the insert is the only
//! coordination point between concurrent scans: whoever inserts first owns the milestone.
//! Per-channel delivery rows let a partially failed dispatch be retried later without
//! repeating channels that already went out.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::channel::Channel;
use super::domain::DocumentId;
use super::milestone::ReminderMilestone;

/// Result of an attempt to take ownership of a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
}

/// Forward-only lifecycle of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    /// Claimed and not yet fully delivered; eligible for retry.
    Claimed,
    Delivered,
    PermanentlyFailed,
}

impl ClaimState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimState::Claimed => "claimed",
            ClaimState::Delivered => "delivered",
            ClaimState::PermanentlyFailed => "permanently_failed",
        }
    }
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimState {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "claimed" => Ok(ClaimState::Claimed),
            "delivered" => Ok(ClaimState::Delivered),
            "permanently_failed" => Ok(ClaimState::PermanentlyFailed),
            other => Err(format!("unknown claim state '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderClaim {
    pub document_id: DocumentId,
    pub milestone: ReminderMilestone,
    pub state: ClaimState,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger row is corrupt: {0}")]
    Corrupt(String),
}

/// Durable claim storage. Implementations must make `try_claim` and `begin_retry` atomic.
pub trait ReminderLedger: Send + Sync {
    /// Insert the (document, milestone) claim; an existing row means `AlreadyClaimed`.
    fn try_claim(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        at: DateTime<Utc>,
    ) -> Result<ClaimOutcome, LedgerError>;

    fn claim(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
    ) -> Result<Option<ReminderClaim>, LedgerError>;

    /// Claims still in `Claimed` state with fewer than `max_attempts` attempts whose last
    /// attempt happened strictly before `attempted_before`.
    fn retryable(
        &self,
        max_attempts: u32,
        attempted_before: DateTime<Utc>,
    ) -> Result<Vec<ReminderClaim>, LedgerError>;

    /// Compare-and-set on the attempt counter. Returns `true` when the caller now owns the
    /// next attempt for `claim`.
    fn begin_retry(&self, claim: &ReminderClaim, at: DateTime<Utc>) -> Result<bool, LedgerError>;

    /// Record a successful channel send. Recording the same channel twice is a no-op.
    fn record_delivery(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    fn delivered_channels(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
    ) -> Result<BTreeSet<Channel>, LedgerError>;

    /// Move a claim out of `Claimed`. Terminal states are never left.
    fn finish(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        state: ClaimState,
    ) -> Result<(), LedgerError>;
}

type ClaimKey = (DocumentId, ReminderMilestone);

#[derive(Debug, Default)]
struct LedgerState {
    claims: BTreeMap<ClaimKey, ReminderClaim>,
    deliveries: BTreeSet<(DocumentId, ReminderMilestone, Channel)>,
}

/// Process-local ledger. Suitable for tests and single-instance deployments without a
/// database; claims do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LedgerState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))
    }

    pub fn claims(&self) -> Result<Vec<ReminderClaim>, LedgerError> {
        Ok(self.lock()?.claims.values().cloned().collect())
    }
}

impl ReminderLedger for InMemoryLedger {
    fn try_claim(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        at: DateTime<Utc>,
    ) -> Result<ClaimOutcome, LedgerError> {
        let mut guard = self.lock()?;
        let key = (document_id.clone(), milestone);
        if guard.claims.contains_key(&key) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        guard.claims.insert(
            key,
            ReminderClaim {
                document_id: document_id.clone(),
                milestone,
                state: ClaimState::Claimed,
                attempts: 1,
                created_at: at,
                last_attempt_at: at,
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    fn claim(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
    ) -> Result<Option<ReminderClaim>, LedgerError> {
        let guard = self.lock()?;
        Ok(guard.claims.get(&(document_id.clone(), milestone)).cloned())
    }

    fn retryable(
        &self,
        max_attempts: u32,
        attempted_before: DateTime<Utc>,
    ) -> Result<Vec<ReminderClaim>, LedgerError> {
        let guard = self.lock()?;
        Ok(guard
            .claims
            .values()
            .filter(|claim| {
                claim.state == ClaimState::Claimed
                    && claim.attempts < max_attempts
                    && claim.last_attempt_at < attempted_before
            })
            .cloned()
            .collect())
    }

    fn begin_retry(&self, claim: &ReminderClaim, at: DateTime<Utc>) -> Result<bool, LedgerError> {
        let mut guard = self.lock()?;
        let key = (claim.document_id.clone(), claim.milestone);
        match guard.claims.get_mut(&key) {
            Some(stored)
                if stored.state == ClaimState::Claimed && stored.attempts == claim.attempts =>
            {
                stored.attempts += 1;
                stored.last_attempt_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn record_delivery(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        channel: Channel,
        _at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut guard = self.lock()?;
        guard
            .deliveries
            .insert((document_id.clone(), milestone, channel));
        Ok(())
    }

    fn delivered_channels(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
    ) -> Result<BTreeSet<Channel>, LedgerError> {
        let guard = self.lock()?;
        Ok(guard
            .deliveries
            .iter()
            .filter(|(doc, m, _)| doc == document_id && *m == milestone)
            .map(|(_, _, channel)| *channel)
            .collect())
    }

    fn finish(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        state: ClaimState,
    ) -> Result<(), LedgerError> {
        let mut guard = self.lock()?;
        if let Some(stored) = guard.claims.get_mut(&(document_id.clone(), milestone)) {
            if stored.state == ClaimState::Claimed {
                stored.state = state;
            }
        }
        Ok(())
    }
}
