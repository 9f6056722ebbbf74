//! CSI client adapter.
//!
//! Translates [`ProvisionRequest`]s and [`DeleteRequest`]s into controller
//! calls on a [`CsiController`], bounds every call by a timeout, and turns
//! the plugin's answer into a classified [`AdapterError`].  The adapter holds
//! no mutable state and is shared by all reconciliation workers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use libcsi::{
    CreateVolumeRequest, CsiController, CsiError, DEFAULT_FS_TYPE, Volume, VolumeCapability,
};
use tracing::{debug, instrument, warn};

use crate::error::AdapterError;
use crate::types::{DeleteRequest, ProvisionRequest};

pub struct CsiAdapter<C> {
    controller: Arc<C>,
    timeout: Duration,
}

impl<C: CsiController> CsiAdapter<C> {
    pub fn new(controller: Arc<C>, timeout: Duration) -> Self {
        Self {
            controller,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create the volume described by `req`.
    ///
    /// On [`AdapterError::Timeout`] the plugin may still create the volume;
    /// retrying with the same request is safe because plugins key creation
    /// on the request name.
    #[instrument(skip_all, fields(name = %req.name, capacity = req.capacity_bytes))]
    pub async fn create_volume(&self, req: &ProvisionRequest) -> Result<Volume, AdapterError> {
        let csi_req = create_volume_request(req);
        let mut volume = self
            .call(
                "CreateVolume",
                &req.name,
                self.controller.create_volume(csi_req),
            )
            .await?;

        if volume.capacity_bytes == 0 {
            // Plugins report zero when they do not track sizes.
            volume.capacity_bytes = req.capacity_bytes;
        } else if volume.capacity_bytes < req.capacity_bytes {
            warn!(
                volume_id = %volume.volume_id,
                allocated = volume.capacity_bytes,
                "plugin allocated less than requested, removing volume"
            );
            if let Err(e) = self
                .call(
                    "DeleteVolume",
                    &req.name,
                    self.controller.delete_volume(&volume.volume_id),
                )
                .await
            {
                warn!(volume_id = %volume.volume_id, error = %e, "failed to remove undersized volume");
            }
            return Err(AdapterError::InsufficientCapacity {
                name: req.name.clone(),
                requested: req.capacity_bytes,
                allocated: volume.capacity_bytes,
            });
        }

        debug!(volume_id = %volume.volume_id, "volume created");
        Ok(volume)
    }

    /// Delete the volume described by `req`.  A volume the plugin does not
    /// know about counts as deleted.
    ///
    /// `DeleteVolume` carries only the volume id; the name and the volume
    /// context are recorded on the span for diagnostics.
    #[instrument(
        skip_all,
        fields(volume_id = %req.volume_id, name = %req.name, attributes = ?req.attributes)
    )]
    pub async fn delete_volume(&self, req: &DeleteRequest) -> Result<(), AdapterError> {
        let result = self
            .call(
                "DeleteVolume",
                &req.volume_id.0,
                self.controller.delete_volume(&req.volume_id),
            )
            .await;
        match result {
            Err(AdapterError::Plugin {
                source: CsiError::NotFound(_),
                ..
            }) => {
                debug!("volume already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn call<T>(
        &self,
        op: &'static str,
        target: &str,
        fut: impl Future<Output = Result<T, CsiError>>,
    ) -> Result<T, AdapterError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(AdapterError::Plugin {
                op,
                target: target.to_owned(),
                source,
            }),
            Err(_) => Err(AdapterError::Timeout {
                op,
                target: target.to_owned(),
                timeout: self.timeout,
            }),
        }
    }
}

/// Build the wire request for `req`: one capability per access mode.
pub fn create_volume_request(req: &ProvisionRequest) -> CreateVolumeRequest {
    let fs_type = req.fs_type.as_deref().unwrap_or(DEFAULT_FS_TYPE);
    CreateVolumeRequest {
        name: req.name.clone(),
        capacity_bytes: req.capacity_bytes,
        volume_capabilities: req
            .access_modes
            .iter()
            .map(|mode| VolumeCapability {
                access_mode: *mode,
                mount_flags: Vec::new(),
                fs_type: fs_type.to_owned(),
            })
            .collect(),
        parameters: req.parameters.clone(),
        accessibility_requirements: req.topology.iter().cloned().collect(),
    }
}
