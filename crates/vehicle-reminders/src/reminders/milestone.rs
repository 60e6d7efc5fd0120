//! Reminder milestones and the window evaluation that decides which one is due.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Fixed reminder offsets before a document expires, ordered from furthest to closest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReminderMilestone {
    #[serde(rename = "28_days")]
    TwentyEightDays,
    #[serde(rename = "21_days")]
    TwentyOneDays,
    #[serde(rename = "14_days")]
    FourteenDays,
    #[serde(rename = "7_days")]
    SevenDays,
    #[serde(rename = "1_day")]
    OneDay,
}

impl ReminderMilestone {
    pub const ALL: [ReminderMilestone; 5] = [
        ReminderMilestone::TwentyEightDays,
        ReminderMilestone::TwentyOneDays,
        ReminderMilestone::FourteenDays,
        ReminderMilestone::SevenDays,
        ReminderMilestone::OneDay,
    ];

    /// Furthest horizon at which any reminder fires.
    pub const HORIZON_DAYS: i64 = 28;

    pub fn days(&self) -> i64 {
        match self {
            ReminderMilestone::TwentyEightDays => 28,
            ReminderMilestone::TwentyOneDays => 21,
            ReminderMilestone::FourteenDays => 14,
            ReminderMilestone::SevenDays => 7,
            ReminderMilestone::OneDay => 1,
        }
    }

    /// Wire name used in the ledger and the HTTP payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderMilestone::TwentyEightDays => "28_days",
            ReminderMilestone::TwentyOneDays => "21_days",
            ReminderMilestone::FourteenDays => "14_days",
            ReminderMilestone::SevenDays => "7_days",
            ReminderMilestone::OneDay => "1_day",
        }
    }

    pub fn from_days(days: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|milestone| milestone.days() == days)
    }
}

impl fmt::Display for ReminderMilestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reminder type '{0}'")]
pub struct UnknownMilestone(pub String);

impl FromStr for ReminderMilestone {
    type Err = UnknownMilestone;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "28_days" | "28d" => Ok(ReminderMilestone::TwentyEightDays),
            "21_days" | "21d" => Ok(ReminderMilestone::TwentyOneDays),
            "14_days" | "14d" => Ok(ReminderMilestone::FourteenDays),
            "7_days" | "7d" => Ok(ReminderMilestone::SevenDays),
            "1_day" | "1_days" | "1d" => Ok(ReminderMilestone::OneDay),
            _ => Err(UnknownMilestone(raw.to_string())),
        }
    }
}

/// Whole days left until `expiry_date` (taken as midnight UTC), rounded up.
pub fn days_until_expiry(expiry_date: NaiveDate, now: DateTime<Utc>) -> i64 {
    let expires_at = expiry_date.and_time(chrono::NaiveTime::MIN).and_utc();
    let millis = (expires_at - now).num_milliseconds();
    let whole = millis.div_euclid(MILLIS_PER_DAY);
    if millis.rem_euclid(MILLIS_PER_DAY) == 0 {
        whole
    } else {
        whole + 1
    }
}

/// Exact-day window evaluation: a milestone is due only on the day its threshold matches.
pub fn evaluate(expiry_date: NaiveDate, now: DateTime<Utc>) -> Option<ReminderMilestone> {
    MilestonePolicy::ExactDay.evaluate(expiry_date, now)
}

/// How day counts map onto milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MilestonePolicy {
    /// Fire only when the remaining day count equals a threshold.
    #[default]
    ExactDay,
    /// Fire the tightest milestone whose threshold is at or above the remaining day count,
    /// so a skipped scan day still produces the reminder on the next run.
    CatchUp,
}

impl MilestonePolicy {
    pub fn evaluate(
        &self,
        expiry_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Option<ReminderMilestone> {
        let days = days_until_expiry(expiry_date, now);
        if !(0..=ReminderMilestone::HORIZON_DAYS).contains(&days) {
            return None;
        }

        match self {
            MilestonePolicy::ExactDay => ReminderMilestone::from_days(days),
            MilestonePolicy::CatchUp => {
                if days == 0 {
                    return None;
                }
                ReminderMilestone::ALL
                    .into_iter()
                    .rev()
                    .find(|milestone| milestone.days() >= days)
            }
        }
    }
}

impl FromStr for MilestonePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exact" | "exact_day" => Ok(MilestonePolicy::ExactDay),
            "catch_up" | "catchup" => Ok(MilestonePolicy::CatchUp),
            other => Err(format!("unknown milestone policy '{other}'")),
        }
    }
}
