//! Keyed work queue with single-flight semantics.
//!
//! A key sits in the ready channel at most once and is never handed to two
//! workers at the same time.  Events that arrive for a key while it is being
//! processed replace the pending event and are picked up once the current
//! attempt finishes.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::Event;

/// One unit of work handed to a worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkItem {
    pub key: String,
    pub event: Event,
    /// Consecutive retryable failures of this key so far.
    pub failures: u32,
}

#[derive(Debug)]
struct Entry {
    event: Event,
    failures: u32,
    /// The key is in the ready channel.
    queued: bool,
    /// A worker owns the key.
    processing: bool,
    /// A newer event arrived while processing.
    dirty: bool,
}

pub(crate) struct WorkQueue {
    entries: Mutex<HashMap<String, Entry>>,
    ready_tx: mpsc::UnboundedSender<String>,
    ready_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        Self {
            entries: Mutex::new(HashMap::new()),
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, key: String) {
        // The receiver lives as long as the queue.
        let _ = self.ready_tx.send(key);
    }

    /// Add `event`, replacing any pending event for the same key.  A fresh
    /// event resets the failure count.
    pub fn add(&self, event: Event) {
        let key = event.key();
        let mut entries = self.entries();
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.event = event;
                entry.failures = 0;
                if entry.processing {
                    entry.dirty = true;
                } else if !entry.queued {
                    entry.queued = true;
                    drop(entries);
                    self.push(key);
                }
            }
            None => {
                entries.insert(
                    key.clone(),
                    Entry {
                        event,
                        failures: 0,
                        queued: true,
                        processing: false,
                        dirty: false,
                    },
                );
                drop(entries);
                self.push(key);
            }
        }
    }

    /// Wait for the next key and claim it for the caller.
    pub async fn next(&self) -> Option<WorkItem> {
        loop {
            let key = self.ready_rx.lock().await.recv().await?;
            let mut entries = self.entries();
            if let Some(entry) = entries.get_mut(&key)
                && entry.queued
                && !entry.processing
            {
                entry.queued = false;
                entry.processing = true;
                entry.dirty = false;
                return Some(WorkItem {
                    key,
                    event: entry.event.clone(),
                    failures: entry.failures,
                });
            }
        }
    }

    /// Release `key` after processing.  The key is forgotten unless a newer
    /// event arrived meanwhile, in which case it is queued again.
    pub fn done(&self, key: &str) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.processing = false;
        if entry.dirty {
            entry.dirty = false;
            entry.queued = true;
            drop(entries);
            self.push(key.to_owned());
        } else {
            entries.remove(key);
        }
    }

    /// Release `key` after a retryable failure.
    ///
    /// Returns `true` when the caller should schedule a [`requeue`]
    /// after backing off, `false` when a newer event already put the key
    /// back in the queue.
    ///
    /// [`requeue`]: Self::requeue
    pub fn backoff(&self, key: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        entry.processing = false;
        if entry.dirty {
            entry.dirty = false;
            entry.queued = true;
            drop(entries);
            self.push(key.to_owned());
            false
        } else {
            entry.failures += 1;
            true
        }
    }

    /// Queue `key` again once its backoff has elapsed.
    pub fn requeue(&self, key: &str) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.processing {
            entry.dirty = true;
        } else if !entry.queued {
            entry.queued = true;
            drop(entries);
            self.push(key.to_owned());
        }
    }

    /// Number of keys currently tracked (queued, processing or backing off).
    pub fn len(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use libcsi::AccessMode;

    use super::*;
    use crate::types::{Claim, ReclaimPolicy};

    fn claim_event(name: &str, capacity_bytes: u64) -> Event {
        Event::ClaimAdded {
            claim: Claim {
                uid: format!("uid-{name}"),
                namespace: "default".into(),
                name: name.into(),
                provisioner: "k8s.io/default".into(),
                storage_class: String::new(),
                capacity_bytes,
                access_modes: vec![AccessMode::ReadWriteOnce],
                parameters: HashMap::new(),
                selected_node: None,
                reclaim_policy: ReclaimPolicy::Delete,
            },
        }
    }

    fn capacity(item: &WorkItem) -> u64 {
        match &item.event {
            Event::ClaimAdded { claim } => claim.capacity_bytes,
            Event::VolumeReleased { .. } => unreachable!(),
        }
    }

    async fn next_now(queue: &WorkQueue) -> Option<WorkItem> {
        tokio::time::timeout(Duration::from_millis(50), queue.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add(claim_event("a", 1));
        queue.add(claim_event("a", 2));

        let item = next_now(&queue).await.unwrap();
        assert_eq!(capacity(&item), 2);
        assert!(next_now(&queue).await.is_none());
    }

    #[tokio::test]
    async fn key_is_not_handed_out_while_processing() {
        let queue = WorkQueue::new();
        queue.add(claim_event("a", 1));
        let item = next_now(&queue).await.unwrap();

        queue.add(claim_event("a", 2));
        assert!(next_now(&queue).await.is_none());

        queue.done(&item.key);
        let item = next_now(&queue).await.unwrap();
        assert_eq!(capacity(&item), 2);
        queue.done(&item.key);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn backoff_counts_failures_until_requeued() {
        let queue = WorkQueue::new();
        queue.add(claim_event("a", 1));

        let item = next_now(&queue).await.unwrap();
        assert_eq!(item.failures, 0);
        assert!(queue.backoff(&item.key));
        assert!(next_now(&queue).await.is_none());
        assert_eq!(queue.len(), 1);

        queue.requeue(&item.key);
        let item = next_now(&queue).await.unwrap();
        assert_eq!(item.failures, 1);
    }

    #[tokio::test]
    async fn newer_event_during_processing_skips_backoff() {
        let queue = WorkQueue::new();
        queue.add(claim_event("a", 1));
        let item = next_now(&queue).await.unwrap();

        queue.add(claim_event("a", 2));
        assert!(!queue.backoff(&item.key));

        let item = next_now(&queue).await.unwrap();
        assert_eq!(capacity(&item), 2);
        assert_eq!(item.failures, 0);
    }

    #[tokio::test]
    async fn different_keys_are_independent() {
        let queue = WorkQueue::new();
        queue.add(claim_event("a", 1));
        queue.add(claim_event("b", 1));

        let first = next_now(&queue).await.unwrap();
        let second = next_now(&queue).await.unwrap();
        assert_ne!(first.key, second.key);
    }
}
