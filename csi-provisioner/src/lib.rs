//! # csi-provisioner - external volume provisioner for CSI plugins
//!
//! Watches storage claims handed over by a controller framework, provisions
//! volumes for the ones it owns through a CSI plugin on a local Unix socket,
//! and hands the resulting volume descriptors back for persistence.
//!
//! | Module | Purpose |
//! |---|---|
//! | [`adapter`] | Timeout-bounded, classified `CreateVolume`/`DeleteVolume` calls. |
//! | [`identity`] | Process-unique provisioner identity used to tag volumes. |
//! | [`reconciler`] | Provisioning and deletion state machines. |
//! | [`controller`] | Work queue, worker pool and backoff driving the reconcilers. |
//! | [`discovery`] | Startup handshake with the plugin. |
//! | [`bridge`] | JSON-lines event source and state store on stdio. |
//! | [`config`] | Command line and environment. |

pub mod adapter;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod quantity;
pub mod reconciler;
pub mod retry;
pub mod types;

pub use controller::{ControllerConfig, Event, ProvisionController, StateStore};
pub use error::{AdapterError, ConfigError, ErrorClass, ReconcileError, StoreError};
pub use identity::Identity;
pub use reconciler::{
    CsiProvisioner, DeleteOutcome, DeletionPolicy, ProvisionOutcome, Provisioner,
    ProvisionerOptions,
};
pub use types::{Claim, ClaimRef, DeleteRequest, ProvisionRequest, ReclaimPolicy, VolumeDescriptor};
