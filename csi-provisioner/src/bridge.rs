//! JSON-lines bridge to an external controller framework.
//!
//! The framework writes [`Event`]s to the provisioner's stdin, one JSON
//! object per line, and reads the state-store operations the dispatcher
//! performs from stdout:
//!
//! ```text
//! {"op":"save_volume","volume":{...}}
//! {"op":"purge_volume","name":"pvc-6f1d","volume_id":"mem-..."}
//! {"op":"failure","key":"claim:default/data","retryable":false,"error":"..."}
//! ```

use async_trait::async_trait;
use libcsi::VolumeId;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::controller::{Event, MemoryStore, StateStore};
use crate::error::{ReconcileError, StoreError};
use crate::types::{Claim, VolumeDescriptor};

/// Forward events read from `reader` into `events` until EOF or until the
/// receiving side goes away.  Returns the number of events forwarded.
pub async fn forward_events<R>(reader: R, events: mpsc::Sender<Event>) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut forwarded = 0;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed event");
                continue;
            }
        };
        debug!(key = %event.key(), "event received");
        if events.send(event).await.is_err() {
            break;
        }
        forwarded += 1;
    }
    Ok(forwarded)
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum StoreOp<'a> {
    SaveVolume {
        volume: &'a VolumeDescriptor,
    },
    PurgeVolume {
        name: &'a str,
        volume_id: &'a VolumeId,
    },
    Failure {
        key: &'a str,
        retryable: bool,
        error: String,
    },
}

/// [`StateStore`] that reports every operation as a JSON line on `writer`
/// and remembers bound claims locally.
pub struct JsonLinesStore<W> {
    writer: Mutex<W>,
    local: MemoryStore,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesStore<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            local: MemoryStore::new(),
        }
    }

    async fn emit(&self, op: &StoreOp<'_>) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(op).map_err(StoreError::new)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await.map_err(StoreError::new)?;
        writer.flush().await.map_err(StoreError::new)
    }

    /// Consume the store and return the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> StateStore for JsonLinesStore<W> {
    async fn is_bound(&self, claim: &Claim) -> Result<bool, StoreError> {
        self.local.is_bound(claim).await
    }

    async fn save_volume(&self, volume: &VolumeDescriptor) -> Result<(), StoreError> {
        self.emit(&StoreOp::SaveVolume { volume }).await?;
        self.local.save_volume(volume).await
    }

    async fn purge_volume(&self, volume: &VolumeDescriptor) -> Result<(), StoreError> {
        self.emit(&StoreOp::PurgeVolume {
            name: &volume.name,
            volume_id: &volume.volume_id,
        })
        .await?;
        self.local.purge_volume(volume).await
    }

    async fn record_failure(&self, key: &str, error: &ReconcileError) -> Result<(), StoreError> {
        self.emit(&StoreOp::Failure {
            key,
            retryable: error.is_retryable(),
            error: error.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use libcsi::AccessMode;

    use super::*;
    use crate::types::{ClaimRef, ReclaimPolicy};

    fn volume() -> VolumeDescriptor {
        VolumeDescriptor {
            name: "pvc-6f1d".into(),
            volume_id: "mem-1".into(),
            capacity_bytes: 1 << 30,
            access_modes: vec![AccessMode::ReadWriteOnce],
            provisioner_identity: "1-2-k8s.io/default".into(),
            attributes: HashMap::new(),
            accessible_topology: Vec::new(),
            reclaim_policy: ReclaimPolicy::Delete,
            storage_class: "fast".into(),
            claim_ref: ClaimRef {
                namespace: "default".into(),
                name: "data".into(),
                uid: "6f1d".into(),
            },
        }
    }

    #[tokio::test]
    async fn forwards_events_and_skips_garbage() {
        let input = br#"{"type":"claim_added","claim":{"uid":"6f1d","namespace":"default","name":"data","provisioner":"k8s.io/default","capacity":"1Gi","access_modes":["ReadWriteOnce"]}}

not json
{"type":"volume_released","volume":{"name":"pvc-6f1d","volume_id":"mem-1","capacity_bytes":1073741824,"access_modes":["ReadWriteOnce"],"provisioner_identity":"1-2-k8s.io/default","claim_ref":{"namespace":"default","name":"data","uid":"6f1d"}}}
"#;
        let (tx, mut rx) = mpsc::channel(8);
        let forwarded = forward_events(&input[..], tx).await.unwrap();
        assert_eq!(forwarded, 2);

        match rx.recv().await.unwrap() {
            Event::ClaimAdded { claim } => assert_eq!(claim.capacity_bytes, 1 << 30),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            Event::VolumeReleased { volume } => assert_eq!(volume.name, "pvc-6f1d"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn fractional_capacity_is_forwarded() {
        let input = br#"{"type":"claim_added","claim":{"uid":"7a2e","namespace":"default","name":"logs","provisioner":"k8s.io/default","capacity":"1.5Gi","access_modes":["ReadWriteOnce"]}}
"#;
        let (tx, mut rx) = mpsc::channel(8);
        assert_eq!(forward_events(&input[..], tx).await.unwrap(), 1);

        match rx.recv().await.unwrap() {
            Event::ClaimAdded { claim } => assert_eq!(claim.capacity_bytes, 3 << 29),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn store_operations_become_json_lines() {
        let store = JsonLinesStore::new(Vec::new());
        let volume = volume();
        store.save_volume(&volume).await.unwrap();
        store.purge_volume(&volume).await.unwrap();
        store
            .record_failure(
                "claim:default/data",
                &ReconcileError::InvalidClaim {
                    claim: "default/data".into(),
                    reason: "no access modes requested".into(),
                },
            )
            .await
            .unwrap();

        let out = String::from_utf8(store.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["op"], "save_volume");
        assert_eq!(lines[0]["volume"]["volume_id"], "mem-1");
        assert_eq!(lines[1]["op"], "purge_volume");
        assert_eq!(lines[1]["name"], "pvc-6f1d");
        assert_eq!(lines[2]["op"], "failure");
        assert_eq!(lines[2]["retryable"], false);
        assert_eq!(
            lines[2]["error"],
            "claim default/data is invalid: no access modes requested"
        );
    }

    #[tokio::test]
    async fn bound_claims_are_tracked() {
        let store = JsonLinesStore::new(Vec::new());
        let volume = volume();
        let claim: Claim = serde_json::from_value(serde_json::json!({
            "uid": "6f1d",
            "namespace": "default",
            "name": "data",
            "provisioner": "k8s.io/default",
            "capacity": 1024,
        }))
        .unwrap();

        assert!(!store.is_bound(&claim).await.unwrap());
        store.save_volume(&volume).await.unwrap();
        assert!(store.is_bound(&claim).await.unwrap());
        store.purge_volume(&volume).await.unwrap();
        assert!(!store.is_bound(&claim).await.unwrap());
    }
}
