//! # libcsi - Simplified CSI over a Unix socket for RK8s
//!
//! `libcsi` implements a lightweight [Container Storage Interface][csi] layer
//! carrying JSON messages over a local Unix domain socket.  It is the wire
//! half of the external provisioner and follows the RK8s architecture
//! conventions (Tokio async runtime, `tracing` for observability,
//! `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`message`] | [`CsiMessage`] protocol envelope. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete. |
//! | [`transport`] | Unix-socket client/server built on Tokio. |
//! | [`backend`] | In-memory reference plugin. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod controller;
pub mod error;
pub mod identity;
pub mod message;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use controller::CsiController;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use transport::{CsiClient, CsiServer};
pub use types::*;
