//! Provisioning and deletion reconcilers.
//!
//! [`CsiProvisioner`] is the explicit context both reconcilers run in: the
//! static options, the process [`Identity`], the [`CsiAdapter`] and the
//! process-wide shutdown token.  It is built once at startup and shared by
//! every worker; nothing in it is mutable.
//!
//! The dispatcher talks to it through the [`Provisioner`] trait.  Both entry
//! points may be invoked any number of times for the same claim or volume and
//! converge on at most one external volume.

mod delete;
mod provision;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libcsi::CsiController;
use tokio_util::sync::CancellationToken;

use crate::adapter::CsiAdapter;
use crate::error::{AdapterError, ReconcileError};
use crate::identity::Identity;
use crate::types::{Claim, VolumeDescriptor};

pub use provision::{
    FS_TYPE_PARAMETER, RESERVED_PARAMETER_PREFIX, TOPOLOGY_NODE_KEY, external_volume_name,
};

/// Whether deletion honours the identity tag on a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Delete any volume tagged with this provisioner's name, whichever
    /// process created it.  A restarted provisioner gets a new identity and
    /// must still be able to clean up after its predecessor.
    #[default]
    IgnoreIdentity,
    /// Only delete volumes whose tag equals this process's identity.
    StrictOwnership,
}

/// Static settings of a [`CsiProvisioner`].
#[derive(Debug, Clone)]
pub struct ProvisionerOptions {
    /// Claims whose storage class names another provisioner are declined.
    pub provisioner_name: String,
    /// External volume names are `<prefix>-<claim uid>`.
    pub volume_name_prefix: String,
    /// Upper bound for every plugin call.
    pub timeout: Duration,
    pub deletion_policy: DeletionPolicy,
    /// The plugin advertised topology support.
    pub supports_topology: bool,
}

impl ProvisionerOptions {
    pub fn new(provisioner_name: impl Into<String>) -> Self {
        Self {
            provisioner_name: provisioner_name.into(),
            volume_name_prefix: "pvc".to_owned(),
            timeout: Duration::from_secs(10),
            deletion_policy: DeletionPolicy::default(),
            supports_topology: false,
        }
    }
}

/// Result of a provisioning run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The volume exists; the descriptor must be persisted.
    Provisioned(VolumeDescriptor),
    /// The claim belongs to another provisioner.
    Declined,
}

/// Result of a deletion run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The volume is gone; its record may be purged.
    Deleted,
    /// The volume belongs to another provisioner.
    Declined,
}

/// Entry points the dispatcher drives.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a volume for `claim`, or decline it.
    async fn provision(&self, claim: &Claim) -> Result<ProvisionOutcome, ReconcileError>;

    /// Delete the backing volume of `volume`, or decline it.
    async fn delete(&self, volume: &VolumeDescriptor) -> Result<DeleteOutcome, ReconcileError>;
}

/// Reconciler context backed by a CSI plugin.
pub struct CsiProvisioner<C> {
    options: ProvisionerOptions,
    identity: Identity,
    adapter: CsiAdapter<C>,
    shutdown: CancellationToken,
}

impl<C: CsiController> CsiProvisioner<C> {
    pub fn new(
        options: ProvisionerOptions,
        identity: Identity,
        controller: Arc<C>,
        shutdown: CancellationToken,
    ) -> Self {
        let adapter = CsiAdapter::new(controller, options.timeout);
        Self {
            options,
            identity,
            adapter,
            shutdown,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn options(&self) -> &ProvisionerOptions {
        &self.options
    }

    /// Run an adapter call, abandoning it if the process shuts down first.
    async fn until_shutdown<T>(
        &self,
        key: String,
        call: impl Future<Output = Result<T, AdapterError>>,
        wrap: impl FnOnce(String, AdapterError) -> ReconcileError,
    ) -> Result<T, ReconcileError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ReconcileError::Cancelled { key }),
            result = call => result.map_err(|source| wrap(key, source)),
        }
    }
}

#[async_trait]
impl<C: CsiController + 'static> Provisioner for CsiProvisioner<C> {
    async fn provision(&self, claim: &Claim) -> Result<ProvisionOutcome, ReconcileError> {
        self.reconcile_claim(claim).await
    }

    async fn delete(&self, volume: &VolumeDescriptor) -> Result<DeleteOutcome, ReconcileError> {
        self.reconcile_volume(volume).await
    }
}
