//! Synthetic records for operator test sends.
//!
//! A probe goes through the real templates, plan gate and adapters, but the document, owner
//! and plan are fabricated so no real milestone claim is consumed.

use chrono::{DateTime, Duration, Utc};

use super::domain::{
    Document, DocumentId, DocumentType, OwnerId, PlanStatus, PlanTier, UserNotificationProfile,
    Vehicle, VehicleId,
};
use super::milestone::ReminderMilestone;

/// Where probe reminders are delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeRecipient {
    pub owner_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProbeFixture {
    pub document: Document,
    pub vehicle: Vehicle,
    pub profile: UserNotificationProfile,
    pub plan: PlanStatus,
}

impl ProbeRecipient {
    /// Fabricate an insurance document expiring exactly `milestone` days after `now`, owned by
    /// an active pro subscriber with every channel enabled.
    pub fn fixture(
        &self,
        document_id: &DocumentId,
        milestone: ReminderMilestone,
        now: DateTime<Utc>,
    ) -> ProbeFixture {
        let owner_id = OwnerId(
            self.owner_id
                .clone()
                .unwrap_or_else(|| "probe-owner".to_string()),
        );
        let vehicle = Vehicle {
            id: VehicleId("probe-vehicle".to_string()),
            make: "Test".to_string(),
            model: "Vehicle".to_string(),
            year: None,
            license_plate: Some("TEST-000".to_string()),
        };
        let document = Document {
            id: document_id.clone(),
            owner_id: owner_id.clone(),
            vehicle_id: vehicle.id.clone(),
            document_type: DocumentType::Insurance,
            expiry_date: Some((now + Duration::days(milestone.days())).date_naive()),
            title: "[TEST] Insurance reminder".to_string(),
        };
        let profile = UserNotificationProfile {
            owner_id: owner_id.clone(),
            full_name: "Test Recipient".to_string(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            email_enabled: true,
            push_enabled: true,
            sms_enabled: true,
        };
        let plan = PlanStatus {
            owner_id,
            tier: PlanTier::Pro,
            active: true,
            current_period_end: None,
        };

        ProbeFixture {
            document,
            vehicle,
            profile,
            plan,
        }
    }
}
