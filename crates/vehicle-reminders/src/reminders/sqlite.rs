//! SQLite-backed ledger. The UNIQUE constraints carry the at-most-once guarantee, so several
//! processes pointing at the same database file stay consistent.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::channel::Channel;
use super::domain::DocumentId;
use super::ledger::{ClaimOutcome, ClaimState, LedgerError, ReminderClaim, ReminderLedger};
use super::milestone::ReminderMilestone;

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(unavailable)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn migrate(&self) -> Result<(), LedgerError> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS reminder_claims (
                document_id TEXT NOT NULL,
                reminder_type TEXT NOT NULL,      -- '28_days' .. '1_day'
                state TEXT NOT NULL DEFAULT 'claimed',
                attempts INTEGER NOT NULL DEFAULT 1,
                sent_at TEXT NOT NULL,
                last_attempt_at TEXT NOT NULL,
                UNIQUE (document_id, reminder_type)
            );

            CREATE TABLE IF NOT EXISTS reminder_deliveries (
                document_id TEXT NOT NULL,
                reminder_type TEXT NOT NULL,
                channel TEXT NOT NULL,            -- 'email', 'push', 'sms'
                delivered_at TEXT NOT NULL,
                UNIQUE (document_id, reminder_type, channel)
            );

            CREATE INDEX IF NOT EXISTS idx_reminder_claims_state
                ON reminder_claims (state);
            ",
            )
            .map_err(unavailable)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Unavailable("sqlite connection mutex poisoned".to_string()))
    }
}

fn unavailable(err: rusqlite::Error) -> LedgerError {
    LedgerError::Unavailable(err.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| LedgerError::Corrupt(format!("timestamp '{raw}': {err}")))
}

struct ClaimRow {
    document_id: String,
    reminder_type: String,
    state: String,
    attempts: u32,
    sent_at: String,
    last_attempt_at: String,
}

impl ClaimRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            document_id: row.get(0)?,
            reminder_type: row.get(1)?,
            state: row.get(2)?,
            attempts: row.get(3)?,
            sent_at: row.get(4)?,
            last_attempt_at: row.get(5)?,
        })
    }

    fn into_claim(self) -> Result<ReminderClaim, LedgerError> {
        let milestone = self
            .reminder_type
            .parse::<ReminderMilestone>()
            .map_err(|err| LedgerError::Corrupt(err.to_string()))?;
        let state = self
            .state
            .parse::<ClaimState>()
            .map_err(LedgerError::Corrupt)?;
        Ok(ReminderClaim {
            document_id: DocumentId(self.document_id),
            milestone,
            state,
            attempts: self.attempts,
            created_at: parse_timestamp(&self.sent_at)?,
            last_attempt_at: parse_timestamp(&self.last_attempt_at)?,
        })
    }
}

const CLAIM_COLUMNS: &str =
    "document_id, reminder_type, state, attempts, sent_at, last_attempt_at";

impl ReminderLedger for SqliteLedger {
    fn try_claim(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        at: DateTime<Utc>,
    ) -> Result<ClaimOutcome, LedgerError> {
        let stamp = at.to_rfc3339();
        let inserted = self.lock()?.execute(
            "INSERT INTO reminder_claims (document_id, reminder_type, state, attempts, sent_at, last_attempt_at)
             VALUES (?1, ?2, 'claimed', 1, ?3, ?3)",
            params![document_id.0, milestone.as_str(), stamp],
        );

        match inserted {
            Ok(_) => Ok(ClaimOutcome::Claimed),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Ok(ClaimOutcome::AlreadyClaimed)
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    fn claim(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
    ) -> Result<Option<ReminderClaim>, LedgerError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {CLAIM_COLUMNS} FROM reminder_claims
                     WHERE document_id = ?1 AND reminder_type = ?2"
                ),
                params![document_id.0, milestone.as_str()],
                ClaimRow::from_row,
            )
            .optional()
            .map_err(unavailable)?;
        row.map(ClaimRow::into_claim).transpose()
    }

    fn retryable(
        &self,
        max_attempts: u32,
        attempted_before: DateTime<Utc>,
    ) -> Result<Vec<ReminderClaim>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CLAIM_COLUMNS} FROM reminder_claims
                 WHERE state = 'claimed' AND attempts < ?1
                 ORDER BY sent_at"
            ))
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![max_attempts], ClaimRow::from_row)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;

        let mut claims = Vec::with_capacity(rows.len());
        for row in rows {
            let claim = row.into_claim()?;
            if claim.last_attempt_at < attempted_before {
                claims.push(claim);
            }
        }
        Ok(claims)
    }

    fn begin_retry(&self, claim: &ReminderClaim, at: DateTime<Utc>) -> Result<bool, LedgerError> {
        let updated = self
            .lock()?
            .execute(
                "UPDATE reminder_claims
                 SET attempts = attempts + 1, last_attempt_at = ?1
                 WHERE document_id = ?2 AND reminder_type = ?3
                   AND state = 'claimed' AND attempts = ?4",
                params![
                    at.to_rfc3339(),
                    claim.document_id.0,
                    claim.milestone.as_str(),
                    claim.attempts
                ],
            )
            .map_err(unavailable)?;
        Ok(updated == 1)
    }

    fn record_delivery(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.lock()?
            .execute(
                "INSERT OR IGNORE INTO reminder_deliveries (document_id, reminder_type, channel, delivered_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    document_id.0,
                    milestone.as_str(),
                    channel.as_str(),
                    at.to_rfc3339()
                ],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn delivered_channels(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
    ) -> Result<BTreeSet<Channel>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT channel FROM reminder_deliveries
                 WHERE document_id = ?1 AND reminder_type = ?2",
            )
            .map_err(unavailable)?;
        let names = stmt
            .query_map(params![document_id.0, milestone.as_str()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;

        names
            .iter()
            .map(|name| name.parse::<Channel>().map_err(LedgerError::Corrupt))
            .collect()
    }

    fn finish(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        state: ClaimState,
    ) -> Result<(), LedgerError> {
        self.lock()?
            .execute(
                "UPDATE reminder_claims SET state = ?1
                 WHERE document_id = ?2 AND reminder_type = ?3 AND state = 'claimed'",
                params![state.as_str(), document_id.0, milestone.as_str()],
            )
            .map_err(unavailable)?;
        Ok(())
    }
}
