//! Error types for the provisioner.
//!
//! Errors are layered the same way the calls are: the CSI adapter reports
//! [`AdapterError`], the reconcilers wrap it with the claim or volume they
//! were working on in [`ReconcileError`], and the dispatcher only looks at
//! [`ReconcileError::class`] to decide between backoff and a permanent
//! failure.  Startup problems are [`ConfigError`]s and are fatal.

use std::time::Duration;

use libcsi::CsiError;
use thiserror::Error;

/// How the dispatcher must treat a failed reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: requeue with backoff.  The external outcome is unknown.
    Retryable,
    /// Permanent: surface to the requester and stop retrying.
    Terminal,
    /// Permanent: a volume with the same name but different parameters
    /// already exists.
    Conflict,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        self == Self::Retryable
    }
}

/// Failure of a single CSI call made by the adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The plugin did not answer within the configured timeout.
    #[error("{op} {target}: no response from plugin within {timeout:?}")]
    Timeout {
        op: &'static str,
        target: String,
        timeout: Duration,
    },

    /// The plugin (or the socket in front of it) reported an error.
    #[error("{op} {target}: {source}")]
    Plugin {
        op: &'static str,
        target: String,
        #[source]
        source: CsiError,
    },

    /// The plugin created a volume smaller than requested.
    #[error("volume {name}: plugin allocated {allocated} bytes, less than the requested {requested}")]
    InsufficientCapacity {
        name: String,
        requested: u64,
        allocated: u64,
    },
}

impl AdapterError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::Retryable,
            Self::Plugin { source, .. } if source.is_retryable() => ErrorClass::Retryable,
            Self::Plugin {
                source: CsiError::AlreadyExists(_),
                ..
            } => ErrorClass::Conflict,
            Self::Plugin { .. } | Self::InsufficientCapacity { .. } => ErrorClass::Terminal,
        }
    }
}

/// Failure of a provisioning or deletion run, as reported to the dispatcher.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Creating the volume for a claim failed.
    #[error("provisioning claim {claim}: {source}")]
    Provision {
        claim: String,
        #[source]
        source: AdapterError,
    },

    /// Deleting a volume failed.
    #[error("deleting volume {volume}: {source}")]
    Delete {
        volume: String,
        #[source]
        source: AdapterError,
    },

    /// The claim cannot be provisioned as written.
    #[error("claim {claim} is invalid: {reason}")]
    InvalidClaim { claim: String, reason: String },

    /// Persisting the outcome into the state store failed.
    #[error("{key}: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },

    /// The process is shutting down; the in-flight call was abandoned.
    #[error("{key}: reconciliation cancelled by shutdown")]
    Cancelled { key: String },
}

impl ReconcileError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Provision { source, .. } | Self::Delete { source, .. } => source.class(),
            Self::InvalidClaim { .. } => ErrorClass::Terminal,
            Self::Store { .. } | Self::Cancelled { .. } => ErrorClass::Retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

/// Error reported by a [`StateStore`](crate::controller::StateStore).
#[derive(Debug, Error)]
#[error("state store: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new<E: std::fmt::Display>(e: E) -> Self {
        Self(e.to_string())
    }
}

/// Invalid or unusable startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("invalid duration {value:?}: {reason}")]
    Duration { value: String, reason: String },

    #[error("CSI plugin at {endpoint} is unreachable: {source}")]
    PluginUnreachable {
        endpoint: String,
        #[source]
        source: CsiError,
    },

    #[error("CSI plugin {plugin} does not provide the controller service")]
    NoControllerService { plugin: String },
}
