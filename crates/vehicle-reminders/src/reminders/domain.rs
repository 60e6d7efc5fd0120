use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for tracked vehicle documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

/// Identifier wrapper for the user owning a vehicle and its documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

/// Kinds of vehicle paperwork that carry an expiry date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    License,
    Insurance,
    Inspection,
    Registration,
}

impl DocumentType {
    pub fn label(&self) -> &'static str {
        match self {
            DocumentType::License => "driver's license",
            DocumentType::Insurance => "insurance policy",
            DocumentType::Inspection => "technical inspection",
            DocumentType::Registration => "vehicle registration",
        }
    }
}

/// Document record as maintained by the CRUD side of the product. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub owner_id: OwnerId,
    pub vehicle_id: VehicleId,
    pub document_type: DocumentType,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub make: String,
    pub model: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub license_plate: Option<String>,
}

impl Vehicle {
    /// Human readable identity used in reminder copy, e.g. `2019 Toyota Corolla (ABC-123)`.
    pub fn display_name(&self) -> String {
        let mut name = match self.year {
            Some(year) => format!("{year} {} {}", self.make, self.model),
            None => format!("{} {}", self.make, self.model),
        };
        if let Some(plate) = self.license_plate.as_deref().filter(|p| !p.trim().is_empty()) {
            name.push_str(&format!(" ({})", plate.trim()));
        }
        name
    }
}

/// Channel preferences and contact details for a document owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNotificationProfile {
    pub owner_id: OwnerId,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub sms_enabled: bool,
}

impl UserNotificationProfile {
    pub fn has_phone(&self) -> bool {
        self.phone
            .as_deref()
            .map(|phone| !phone.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Pro,
}

/// Subscription snapshot for an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStatus {
    pub owner_id: OwnerId,
    pub tier: PlanTier,
    pub active: bool,
    /// End of the paid period; `None` means open-ended.
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
}

impl PlanStatus {
    /// Plan assumed for owners without a subscription record.
    pub fn free(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            tier: PlanTier::Free,
            active: false,
            current_period_end: None,
        }
    }

    /// Resolve the active window against `now`: a lapsed period clears the active flag.
    pub fn effective_at(mut self, now: DateTime<Utc>) -> Self {
        if let Some(end) = self.current_period_end {
            if end <= now {
                self.active = false;
            }
        }
        self
    }

    pub fn is_active_pro(&self) -> bool {
        self.tier == PlanTier::Pro && self.active
    }
}
