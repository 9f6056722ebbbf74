use std::collections::HashMap;

use libcsi::{CsiController, Topology};
use tracing::{debug, info, instrument};

use super::{CsiProvisioner, ProvisionOutcome};
use crate::error::ReconcileError;
use crate::types::{Claim, ProvisionRequest, VolumeDescriptor};

/// Storage class parameters under this prefix configure the provisioner
/// itself and are never passed to the plugin.
pub const RESERVED_PARAMETER_PREFIX: &str = "csi.storage.k8s.io/";

/// Storage class parameter selecting the filesystem type.
pub const FS_TYPE_PARAMETER: &str = "csi.storage.k8s.io/fstype";

/// Topology segment key carrying the selected node.
pub const TOPOLOGY_NODE_KEY: &str = "node";

/// Name under which the volume for the claim with `claim_uid` is created.
pub fn external_volume_name(prefix: &str, claim_uid: &str) -> String {
    format!("{prefix}-{claim_uid}")
}

impl<C: CsiController> CsiProvisioner<C> {
    /// Derive the plugin request for `claim`.  Deterministic: the same claim
    /// always yields the same request.
    pub fn provision_request(&self, claim: &Claim) -> ProvisionRequest {
        let parameters: HashMap<String, String> = claim
            .parameters
            .iter()
            .filter(|(k, _)| !k.starts_with(RESERVED_PARAMETER_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let topology = claim
            .selected_node
            .as_ref()
            .filter(|_| self.options.supports_topology)
            .map(|node| Topology {
                segments: HashMap::from([(TOPOLOGY_NODE_KEY.to_owned(), node.clone())]),
            });

        ProvisionRequest {
            name: external_volume_name(&self.options.volume_name_prefix, &claim.uid),
            capacity_bytes: claim.capacity_bytes,
            access_modes: claim.access_modes.clone(),
            fs_type: claim.parameters.get(FS_TYPE_PARAMETER).cloned(),
            parameters,
            topology,
        }
    }

    #[instrument(skip_all, fields(claim = %claim.key(), uid = %claim.uid))]
    pub(super) async fn reconcile_claim(
        &self,
        claim: &Claim,
    ) -> Result<ProvisionOutcome, ReconcileError> {
        if claim.provisioner != self.options.provisioner_name {
            debug!(provisioner = %claim.provisioner, "claim belongs to another provisioner");
            return Ok(ProvisionOutcome::Declined);
        }
        if claim.access_modes.is_empty() {
            return Err(ReconcileError::InvalidClaim {
                claim: claim.key(),
                reason: "no access modes requested".to_owned(),
            });
        }

        let req = self.provision_request(claim);
        info!(name = %req.name, capacity = req.capacity_bytes, "provisioning volume");

        let volume = self
            .until_shutdown(claim.key(), self.adapter.create_volume(&req), |claim, source| {
                ReconcileError::Provision { claim, source }
            })
            .await?;

        let descriptor = VolumeDescriptor {
            name: req.name,
            volume_id: volume.volume_id,
            capacity_bytes: volume.capacity_bytes,
            access_modes: claim.access_modes.clone(),
            provisioner_identity: self.identity.to_string(),
            attributes: volume.volume_context,
            accessible_topology: volume.accessible_topology,
            reclaim_policy: claim.reclaim_policy,
            storage_class: claim.storage_class.clone(),
            claim_ref: claim.claim_ref(),
        };
        info!(
            volume = %descriptor.name,
            volume_id = %descriptor.volume_id,
            capacity = descriptor.capacity_bytes,
            "volume provisioned"
        );
        Ok(ProvisionOutcome::Provisioned(descriptor))
    }
}
