#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use csi_provisioner::{Claim, CsiProvisioner, Identity, ProvisionerOptions, ReclaimPolicy};
use libcsi::AccessMode;
use libcsi::backend::MemoryBackend;
use tokio_util::sync::CancellationToken;

pub const GI: u64 = 1 << 30;
pub const PROVISIONER: &str = "k8s.io/default";

pub fn claim(uid: &str, capacity_bytes: u64) -> Claim {
    Claim {
        uid: uid.into(),
        namespace: "default".into(),
        name: format!("claim-{uid}"),
        provisioner: PROVISIONER.into(),
        storage_class: "standard".into(),
        capacity_bytes,
        access_modes: vec![AccessMode::ReadWriteOnce],
        parameters: HashMap::from([("pool".to_owned(), "gold".to_owned())]),
        selected_node: None,
        reclaim_policy: ReclaimPolicy::Delete,
    }
}

pub fn options() -> ProvisionerOptions {
    let mut options = ProvisionerOptions::new(PROVISIONER);
    options.timeout = Duration::from_secs(2);
    options
}

pub fn provisioner_with(
    backend: Arc<MemoryBackend>,
    options: ProvisionerOptions,
) -> CsiProvisioner<MemoryBackend> {
    CsiProvisioner::new(
        options,
        Identity::generate(PROVISIONER),
        backend,
        CancellationToken::new(),
    )
}

pub fn provisioner(backend: Arc<MemoryBackend>) -> CsiProvisioner<MemoryBackend> {
    provisioner_with(backend, options())
}
