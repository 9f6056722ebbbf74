use libcsi::CsiController;
use tracing::{debug, info, instrument};

use super::{CsiProvisioner, DeleteOutcome, DeletionPolicy};
use crate::error::ReconcileError;
use crate::identity::Identity;
use crate::types::{DeleteRequest, VolumeDescriptor};

impl<C: CsiController> CsiProvisioner<C> {
    /// Whether this process may delete `volume` under the configured policy.
    pub fn owns(&self, volume: &VolumeDescriptor) -> bool {
        let tag = volume.provisioner_identity.as_str();
        match self.options.deletion_policy {
            DeletionPolicy::StrictOwnership => tag == self.identity.as_str(),
            // Unparseable tags are deleted rather than leaked.
            DeletionPolicy::IgnoreIdentity => Identity::provisioner_name_of(tag)
                .is_none_or(|name| name == self.options.provisioner_name),
        }
    }

    #[instrument(skip_all, fields(volume = %volume.name, volume_id = %volume.volume_id))]
    pub(super) async fn reconcile_volume(
        &self,
        volume: &VolumeDescriptor,
    ) -> Result<DeleteOutcome, ReconcileError> {
        if !self.owns(volume) {
            debug!(tag = %volume.provisioner_identity, "volume belongs to another provisioner");
            return Ok(DeleteOutcome::Declined);
        }

        let req = DeleteRequest::for_volume(volume);
        self.until_shutdown(
            volume.name.clone(),
            self.adapter.delete_volume(&req),
            |volume, source| ReconcileError::Delete { volume, source },
        )
        .await?;

        info!("volume deleted");
        Ok(DeleteOutcome::Deleted)
    }
}
