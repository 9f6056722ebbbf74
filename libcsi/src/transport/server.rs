//! Unix-socket server that runs next to a storage plugin and dispatches
//! incoming CSI requests to the appropriate trait implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, instrument, warn};

use super::MAX_MESSAGE_BYTES;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;

/// A CSI server that accepts Unix-socket connections and dispatches
/// [`CsiMessage`] requests to a [`CsiIdentity`] + [`CsiController`]
/// implementation.
pub struct CsiServer<T> {
    listener: UnixListener,
    path: PathBuf,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + 'static,
{
    /// Create a new server listening on the socket at `path`.
    ///
    /// A stale socket file left behind by a previous run is removed first.
    pub fn bind(path: impl Into<PathBuf>, handler: Arc<T>) -> Result<Self, CsiError> {
        let path = path.into();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale CSI socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CsiError::TransportError(format!(
                    "remove stale socket {}: {e}",
                    path.display()
                )));
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            CsiError::TransportError(format!("bind {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "CSI server listening");
        Ok(Self {
            listener,
            path,
            handler,
        })
    }

    /// Accept connections in a loop until the listener fails.
    ///
    /// Each accepted connection is handled on its own Tokio task.
    pub async fn serve(&self) -> Result<(), CsiError> {
        loop {
            let (stream, _) = self.listener.accept().await.map_err(CsiError::transport)?;
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, &handler).await {
                    error!(error = %e, "CSI connection handler error");
                }
            });
        }
    }

    /// Process a single connection: read request → dispatch → write response.
    #[instrument(skip_all)]
    async fn handle_connection(mut stream: UnixStream, handler: &T) -> Result<(), CsiError> {
        let mut buf = Vec::new();
        (&mut stream)
            .take(MAX_MESSAGE_BYTES)
            .read_to_end(&mut buf)
            .await
            .map_err(CsiError::transport)?;

        let response = match serde_json::from_slice::<CsiMessage>(&buf) {
            Ok(request) => {
                debug!(%request, "CSI request received");
                Self::dispatch(handler, request).await
            }
            Err(e) => CsiMessage::Error(CsiError::InvalidArgument(format!(
                "malformed request: {e}"
            ))),
        };

        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        stream
            .write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        stream.shutdown().await.map_err(CsiError::transport)?;
        Ok(())
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => match handler.probe().await {
                Ok(ok) => CsiMessage::ProbeResult(ok),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginInfo => match handler.get_plugin_info().await {
                Ok(info) => CsiMessage::PluginInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginCapabilities => match handler.get_plugin_capabilities().await {
                Ok(caps) => CsiMessage::PluginCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => match handler.create_volume(req).await {
                Ok(vol) => CsiMessage::VolumeCreated(vol),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::DeleteVolume(id) => match handler.delete_volume(&id).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// Path of the listening socket.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> Drop for CsiServer<T> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
