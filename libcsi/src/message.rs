//! CSI protocol messages transmitted over the plugin socket.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the CSI client (provisioner side) and the CSI
//! server (plugin side).

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI over a Unix socket.
///
/// Each connection carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(VolumeId),

    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    // ----- Responses -------------------------------------------------------
    /// A volume was successfully created.
    VolumeCreated(Volume),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// An error occurred.
    Error(CsiError),
}

impl CsiMessage {
    /// Whether this variant is a request a server should dispatch.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::CreateVolume(_)
                | Self::DeleteVolume(_)
                | Self::Probe
                | Self::GetPluginInfo
                | Self::GetPluginCapabilities
        )
    }
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({})", id),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::PluginInfoResponse(info) => {
                write!(f, "PluginInfo(name={})", info.name)
            }
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::Error(e) => write!(f, "Error({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_roundtrip() {
        let msg = CsiMessage::Error(CsiError::NotFound("vol-1".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::NotFound(_))));
    }

    #[test]
    fn request_variants() {
        assert!(CsiMessage::Probe.is_request());
        assert!(CsiMessage::DeleteVolume("v".into()).is_request());
        assert!(!CsiMessage::Ok.is_request());
        assert!(!CsiMessage::ProbeResult(true).is_request());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(
            CsiMessage::CreateVolume(CreateVolumeRequest {
                name: "pvc-1".into(),
                ..Default::default()
            })
            .to_string(),
            "CreateVolume(name=pvc-1)"
        );
    }
}
