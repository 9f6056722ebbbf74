//! Unix-socket client used by the provisioner to issue CSI requests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, instrument};

use super::MAX_MESSAGE_BYTES;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::types::{CreateVolumeRequest, PluginCapability, PluginInfo, Volume, VolumeId};

/// A lightweight CSI client that sends [`CsiMessage`] requests to the plugin
/// listening on a Unix socket and returns the plugin's response.
///
/// The client keeps no connection state: every request dials the socket
/// anew, so a single instance can be shared between any number of tasks and
/// survives plugin restarts without reconnect logic.
#[derive(Debug, Clone)]
pub struct CsiClient {
    endpoint: PathBuf,
}

impl CsiClient {
    /// Create a client for the plugin socket at `endpoint`.
    ///
    /// No connection is made until the first request.
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Path of the plugin socket.
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Opens a connection, writes the JSON-serialized request, shuts down
    /// the write half, then reads the full response and deserializes it.
    /// The call itself is unbounded; callers wrap it in their own timeout.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let mut stream = UnixStream::connect(&self.endpoint).await.map_err(|e| {
            CsiError::TransportError(format!("connect {}: {e}", self.endpoint.display()))
        })?;

        let payload = serde_json::to_vec(msg).map_err(CsiError::internal)?;
        stream
            .write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        stream.shutdown().await.map_err(CsiError::transport)?;

        let mut buf = Vec::new();
        (&mut stream)
            .take(MAX_MESSAGE_BYTES)
            .read_to_end(&mut buf)
            .await
            .map_err(CsiError::transport)?;

        if buf.is_empty() {
            return Err(CsiError::TransportError(
                "plugin closed the connection without a response".to_owned(),
            ));
        }

        let response: CsiMessage = serde_json::from_slice(&buf)
            .map_err(|e| CsiError::Internal(format!("malformed response: {e}")))?;
        debug!(%response, "CSI response received");
        Ok(response)
    }
}

fn unexpected(op: &str, response: CsiMessage) -> CsiError {
    CsiError::Internal(format!("unexpected response to {op}: {response}"))
}

#[async_trait]
impl CsiIdentity for CsiClient {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        match self.request(&CsiMessage::GetPluginInfo).await? {
            CsiMessage::PluginInfoResponse(info) => Ok(info),
            CsiMessage::Error(e) => Err(e),
            other => Err(unexpected("GetPluginInfo", other)),
        }
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        match self.request(&CsiMessage::Probe).await? {
            CsiMessage::ProbeResult(ready) => Ok(ready),
            CsiMessage::Error(e) => Err(e),
            other => Err(unexpected("Probe", other)),
        }
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        match self.request(&CsiMessage::GetPluginCapabilities).await? {
            CsiMessage::PluginCapabilitiesResponse(caps) => Ok(caps),
            CsiMessage::Error(e) => Err(e),
            other => Err(unexpected("GetPluginCapabilities", other)),
        }
    }
}

#[async_trait]
impl CsiController for CsiClient {
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        match self.request(&CsiMessage::CreateVolume(req)).await? {
            CsiMessage::VolumeCreated(volume) => Ok(volume),
            CsiMessage::Error(e) => Err(e),
            other => Err(unexpected("CreateVolume", other)),
        }
    }

    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        match self
            .request(&CsiMessage::DeleteVolume(volume_id.clone()))
            .await?
        {
            CsiMessage::Ok => Ok(()),
            CsiMessage::Error(e) => Err(e),
            other => Err(unexpected("DeleteVolume", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_socket_is_retryable_transport_error() {
        let tmp = tempfile::tempdir().unwrap();
        let client = CsiClient::new(tmp.path().join("absent.sock"));

        let err = client.probe().await.unwrap_err();
        assert!(matches!(err, CsiError::TransportError(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("absent.sock"));
    }

    #[test]
    fn unexpected_response_is_internal() {
        let err = unexpected("Probe", CsiMessage::Ok);
        assert_eq!(
            err,
            CsiError::Internal("unexpected response to Probe: Ok".into())
        );
        assert!(!err.is_retryable());
    }
}
