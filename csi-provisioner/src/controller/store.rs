//! Persistence seam between the dispatcher and the cluster state store.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{ReconcileError, StoreError};
use crate::types::{Claim, VolumeDescriptor};

/// Where the dispatcher records the outcomes of reconciliation.
///
/// The reconcilers never write state themselves; they return descriptors and
/// the dispatcher persists them through this trait.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Whether a volume is already recorded for `claim`.
    async fn is_bound(&self, claim: &Claim) -> Result<bool, StoreError>;

    /// Record a newly provisioned volume.
    async fn save_volume(&self, volume: &VolumeDescriptor) -> Result<(), StoreError>;

    /// Drop the record of a deleted volume.
    async fn purge_volume(&self, volume: &VolumeDescriptor) -> Result<(), StoreError>;

    /// Surface a permanent failure for the object behind `key`.
    async fn record_failure(&self, key: &str, error: &ReconcileError) -> Result<(), StoreError>;
}

/// A permanent failure as recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub key: String,
    pub message: String,
}

/// In-process [`StateStore`].
#[derive(Default)]
pub struct MemoryStore {
    /// Volume records keyed by volume name.
    volumes: DashMap<String, VolumeDescriptor>,
    failures: DashMap<String, Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume(&self, name: &str) -> Option<VolumeDescriptor> {
        self.volumes.get(name).map(|v| v.clone())
    }

    pub fn volumes(&self) -> Vec<VolumeDescriptor> {
        self.volumes.iter().map(|v| v.value().clone()).collect()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.failures
            .iter()
            .flat_map(|entry| {
                let key = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .map(move |message| FailureRecord {
                        key: key.clone(),
                        message: message.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn is_bound(&self, claim: &Claim) -> Result<bool, StoreError> {
        Ok(self
            .volumes
            .iter()
            .any(|v| v.claim_ref.uid == claim.uid))
    }

    async fn save_volume(&self, volume: &VolumeDescriptor) -> Result<(), StoreError> {
        self.volumes.insert(volume.name.clone(), volume.clone());
        Ok(())
    }

    async fn purge_volume(&self, volume: &VolumeDescriptor) -> Result<(), StoreError> {
        self.volumes.remove(&volume.name);
        Ok(())
    }

    async fn record_failure(&self, key: &str, error: &ReconcileError) -> Result<(), StoreError> {
        self.failures
            .entry(key.to_owned())
            .or_default()
            .push(error.to_string());
        Ok(())
    }
}
