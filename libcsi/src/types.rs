//! Core CSI types: volumes, capabilities, requests, and topology.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over the plugin socket as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume, assigned by the plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type the volume is formatted with.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

/// Filesystem used when the storage class does not name one.
pub const DEFAULT_FS_TYPE: &str = "ext4";

fn default_fs_type() -> String {
    DEFAULT_FS_TYPE.to_owned()
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteOnce,
            mount_flags: Vec::new(),
            fs_type: default_fs_type(),
        }
    }
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Full metadata for a provisioned volume, as reported by the plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes.  Zero means the plugin did not report
    /// a size.
    pub capacity_bytes: u64,
    /// User-supplied parameters from the storage class / request.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Opaque context the plugin wants handed back on later operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Topology constraints (e.g. node affinity).
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    /// Topology segments, e.g. `{"node": "node-01"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
///
/// `name` is chosen by the caller and must be stable across retries: plugins
/// use it to recognise a repeated request and return the existing volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateVolumeRequest {
    /// Caller-chosen name for the volume.
    pub name: String,
    /// Desired capacity in bytes.
    pub capacity_bytes: u64,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Arbitrary parameters forwarded to the backend.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Topologies the volume must be accessible from.
    #[serde(default)]
    pub accessibility_requirements: Vec<Topology>,
}

// ---------------------------------------------------------------------------
// Plugin info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"rk8s.memory.csi"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
    }

    #[test]
    fn create_volume_request_default() {
        let req = CreateVolumeRequest::default();
        assert!(req.name.is_empty());
        assert_eq!(req.capacity_bytes, 0);
        assert!(req.accessibility_requirements.is_empty());
    }

    #[test]
    fn volume_capability_default() {
        let cap = VolumeCapability::default();
        assert_eq!(cap.access_mode, AccessMode::ReadWriteOnce);
        assert_eq!(cap.fs_type, DEFAULT_FS_TYPE);
    }

    #[test]
    fn capability_fs_type_defaults_when_missing() {
        let cap: VolumeCapability =
            serde_json::from_str(r#"{"access_mode":"ReadWriteMany"}"#).expect("deserialize");
        assert_eq!(cap.access_mode, AccessMode::ReadWriteMany);
        assert_eq!(cap.fs_type, "ext4");
        assert!(cap.mount_flags.is_empty());
    }
}
