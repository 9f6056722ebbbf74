//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle.  The
//! provisioner only needs creation and deletion.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{CreateVolumeRequest, Volume, VolumeId};

/// Controller service: centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// Implementations must treat a repeated request with the same `name`
    /// and compatible parameters as a lookup of the existing volume, and a
    /// repeated name with different parameters as
    /// [`CsiError::AlreadyExists`].
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    ///
    /// Plugins may report [`CsiError::NotFound`] for an unknown id; callers
    /// that need idempotent deletion handle that themselves.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;
}
