//! Data model shared by the reconcilers and the dispatcher.

use std::collections::HashMap;

use libcsi::{AccessMode, Topology, VolumeId};
use serde::{Deserialize, Serialize};

use crate::quantity;

/// What happens to a volume once its claim is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    /// Delete the backing volume.
    #[default]
    Delete,
    /// Keep the backing volume for manual cleanup.
    Retain,
}

/// A storage claim waiting for a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Unique, immutable identifier of the claim.
    pub uid: String,
    pub namespace: String,
    pub name: String,
    /// Provisioner named by the claim's storage class.
    pub provisioner: String,
    #[serde(default)]
    pub storage_class: String,
    /// Requested capacity; also accepts quantities such as `"10Gi"`.
    #[serde(rename = "capacity", deserialize_with = "quantity::deserialize_bytes")]
    pub capacity_bytes: u64,
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    /// Storage class parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Node picked by the scheduler, for topology-aware plugins.
    #[serde(default)]
    pub selected_node: Option<String>,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

impl Claim {
    /// `namespace/name`, used in logs and error messages.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn claim_ref(&self) -> ClaimRef {
        ClaimRef {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
        }
    }
}

/// Back-reference from a volume to the claim it was provisioned for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

/// Record of a provisioned volume and everything needed to delete it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDescriptor {
    /// External name the volume was requested under.
    pub name: String,
    /// Plugin-assigned identifier.
    pub volume_id: VolumeId,
    /// Capacity actually allocated.
    pub capacity_bytes: u64,
    pub access_modes: Vec<AccessMode>,
    /// Identity of the provisioner process that created the volume.
    pub provisioner_identity: String,
    /// Plugin volume context, handed back on deletion.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    #[serde(default)]
    pub storage_class: String,
    pub claim_ref: ClaimRef,
}

/// Inputs of a `CreateVolume` call, derived from a claim.
///
/// Must be a pure function of the claim and static configuration so that
/// every retry asks the plugin for the same volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub name: String,
    pub capacity_bytes: u64,
    pub access_modes: Vec<AccessMode>,
    pub fs_type: Option<String>,
    /// Parameters forwarded to the plugin.
    pub parameters: HashMap<String, String>,
    pub topology: Option<Topology>,
}

/// Inputs of a `DeleteVolume` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub volume_id: VolumeId,
    /// Name the volume was created under, for diagnostics.
    pub name: String,
    pub attributes: HashMap<String, String>,
}

impl DeleteRequest {
    pub fn for_volume(volume: &VolumeDescriptor) -> Self {
        Self {
            volume_id: volume.volume_id.clone(),
            name: volume.name.clone(),
            attributes: volume.attributes.clone(),
        }
    }
}
