use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use super::domain::{
    Document, DocumentId, OwnerId, PlanStatus, UserNotificationProfile, Vehicle, VehicleId,
};

/// Read access to documents and vehicles owned by the CRUD side of the product.
pub trait DocumentStore: Send + Sync {
    /// Every document with a non-null expiry date.
    fn documents_with_expiry(&self) -> Result<Vec<Document>, StoreError>;
    fn document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError>;
    fn vehicle(&self, id: &VehicleId) -> Result<Option<Vehicle>, StoreError>;
}

/// Read access to owner profiles and subscription records.
pub trait AccountStore: Send + Sync {
    fn profile(&self, owner: &OwnerId) -> Result<Option<UserNotificationProfile>, StoreError>;
    fn plan(&self, owner: &OwnerId) -> Result<Option<PlanStatus>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Snapshot of the records the reminder engine reads, as loaded from a seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderSeed {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub profiles: Vec<UserNotificationProfile>,
    #[serde(default)]
    pub plans: Vec<PlanStatus>,
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("unable to read seed file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("seed file {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

impl ReminderSeed {
    pub fn from_path(path: &Path) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SeedError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Debug, Default)]
struct DirectoryRecords {
    documents: BTreeMap<DocumentId, Document>,
    vehicles: BTreeMap<VehicleId, Vehicle>,
    profiles: BTreeMap<OwnerId, UserNotificationProfile>,
    plans: BTreeMap<OwnerId, PlanStatus>,
}

/// In-memory implementation of both stores, used by the bundled service and the tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    records: RwLock<DirectoryRecords>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: ReminderSeed) -> Self {
        let directory = Self::new();
        if let Ok(mut records) = directory.records.write() {
            for document in seed.documents {
                records.documents.insert(document.id.clone(), document);
            }
            for vehicle in seed.vehicles {
                records.vehicles.insert(vehicle.id.clone(), vehicle);
            }
            for profile in seed.profiles {
                records.profiles.insert(profile.owner_id.clone(), profile);
            }
            for plan in seed.plans {
                records.plans.insert(plan.owner_id.clone(), plan);
            }
        }
        directory
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DirectoryRecords>, StoreError> {
        self.records
            .read()
            .map_err(|_| StoreError::Unavailable("directory lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DirectoryRecords>, StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::Unavailable("directory lock poisoned".to_string()))
    }

    pub fn upsert_document(&self, document: Document) -> Result<(), StoreError> {
        self.write()?
            .documents
            .insert(document.id.clone(), document);
        Ok(())
    }

    pub fn upsert_vehicle(&self, vehicle: Vehicle) -> Result<(), StoreError> {
        self.write()?.vehicles.insert(vehicle.id.clone(), vehicle);
        Ok(())
    }

    pub fn upsert_profile(&self, profile: UserNotificationProfile) -> Result<(), StoreError> {
        self.write()?
            .profiles
            .insert(profile.owner_id.clone(), profile);
        Ok(())
    }

    pub fn upsert_plan(&self, plan: PlanStatus) -> Result<(), StoreError> {
        self.write()?.plans.insert(plan.owner_id.clone(), plan);
        Ok(())
    }

    pub fn document_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.documents.len())
    }
}

impl DocumentStore for InMemoryDirectory {
    fn documents_with_expiry(&self) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .read()?
            .documents
            .values()
            .filter(|document| document.expiry_date.is_some())
            .cloned()
            .collect())
    }

    fn document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    fn vehicle(&self, id: &VehicleId) -> Result<Option<Vehicle>, StoreError> {
        Ok(self.read()?.vehicles.get(id).cloned())
    }
}

impl AccountStore for InMemoryDirectory {
    fn profile(&self, owner: &OwnerId) -> Result<Option<UserNotificationProfile>, StoreError> {
        Ok(self.read()?.profiles.get(owner).cloned())
    }

    fn plan(&self, owner: &OwnerId) -> Result<Option<PlanStatus>, StoreError> {
        Ok(self.read()?.plans.get(owner).cloned())
    }
}
