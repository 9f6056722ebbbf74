//! Dispatcher driving the reconcilers.
//!
//! [`ProvisionController`] takes [`Event`]s from a channel, keeps them in a
//! single-flight [`WorkQueue`](queue::WorkQueue) and runs a fixed pool of
//! workers over it.  Retryable failures go back into the queue after an
//! exponential backoff; terminal failures and exhausted retry budgets are
//! reported to the [`StateStore`].

mod queue;
mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ReconcileError;
use crate::reconciler::{DeleteOutcome, ProvisionOutcome, Provisioner};
use crate::retry::RetryConfig;
use crate::types::{Claim, ReclaimPolicy, VolumeDescriptor};

use queue::{WorkItem, WorkQueue};
pub use store::{FailureRecord, MemoryStore, StateStore};

/// A change the dispatcher must reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A claim waiting for a volume.
    ClaimAdded { claim: Claim },
    /// A volume whose claim was released.
    VolumeReleased { volume: VolumeDescriptor },
}

impl Event {
    /// Single-flight key.
    pub fn key(&self) -> String {
        match self {
            Self::ClaimAdded { claim } => format!("claim:{}", claim.key()),
            Self::VolumeReleased { volume } => format!("volume:{}", volume.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent reconciliation workers.
    pub workers: usize,
    /// Backoff and retry budget for retryable failures.
    pub retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryConfig::default(),
        }
    }
}

pub struct ProvisionController<P, S> {
    provisioner: Arc<P>,
    store: Arc<S>,
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
}

impl<P, S> ProvisionController<P, S>
where
    P: Provisioner + 'static,
    S: StateStore + 'static,
{
    pub fn new(provisioner: Arc<P>, store: Arc<S>, config: ControllerConfig) -> Self {
        Self {
            provisioner,
            store,
            config,
            queue: Arc::new(WorkQueue::new()),
        }
    }

    /// Queue `event` for reconciliation.
    pub fn enqueue(&self, event: Event) {
        debug!(key = %event.key(), "event queued");
        self.queue.add(event);
    }

    /// Run the workers until `shutdown` fires.
    ///
    /// Events are read from `events` until the sender side closes; queued and
    /// backing-off work keeps being processed until shutdown.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>, shutdown: CancellationToken) {
        let workers = self.config.workers.max(1);
        let mut pool = JoinSet::new();
        for id in 0..workers {
            let this = Arc::clone(&self);
            let shutdown = shutdown.clone();
            pool.spawn(async move { this.worker(id, shutdown).await });
        }
        info!(workers, "provision controller started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.enqueue(event),
                    None => {
                        info!("event source closed, draining queue until shutdown");
                        shutdown.cancelled().await;
                        break;
                    }
                },
            }
        }

        while pool.join_next().await.is_some() {}
        info!(pending = self.queue.len(), "provision controller stopped");
    }

    async fn worker(&self, id: usize, shutdown: CancellationToken) {
        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                item = self.queue.next() => item,
            };
            let Some(item) = item else {
                break;
            };
            self.process(item, &shutdown).await;
        }
        debug!(worker = id, "worker exiting");
    }

    #[instrument(skip_all, fields(key = %item.key))]
    async fn process(&self, item: WorkItem, shutdown: &CancellationToken) {
        let result = match &item.event {
            Event::ClaimAdded { claim } => self.sync_claim(claim).await,
            Event::VolumeReleased { volume } => self.sync_volume(volume).await,
        };

        let err = match result {
            Ok(()) => {
                self.queue.done(&item.key);
                return;
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            error!(error = %err, "reconciliation failed permanently");
            self.report(&item.key, &err).await;
            self.queue.done(&item.key);
            return;
        }

        let failures = item.failures + 1;
        if !self.config.retry.allows_retry(failures) {
            error!(failures, error = %err, "giving up after repeated failures");
            self.report(&item.key, &err).await;
            self.queue.done(&item.key);
            return;
        }
        if !self.queue.backoff(&item.key) {
            debug!(error = %err, "newer event queued, retrying immediately");
            return;
        }

        let delay = self.config.retry.delay_for(failures);
        warn!(failures, delay_ms = delay.as_millis(), error = %err, "reconciliation failed, requeueing");
        let queue = Arc::clone(&self.queue);
        let key = item.key;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.requeue(&key),
            }
        });
    }

    async fn sync_claim(&self, claim: &Claim) -> Result<(), ReconcileError> {
        let store_err = |source| ReconcileError::Store {
            key: claim.key(),
            source,
        };

        if self.store.is_bound(claim).await.map_err(store_err)? {
            debug!("claim already bound");
            return Ok(());
        }

        match self.provisioner.provision(claim).await? {
            ProvisionOutcome::Provisioned(volume) => {
                self.store.save_volume(&volume).await.map_err(store_err)?;
            }
            ProvisionOutcome::Declined => {}
        }
        Ok(())
    }

    async fn sync_volume(&self, volume: &VolumeDescriptor) -> Result<(), ReconcileError> {
        if volume.reclaim_policy != ReclaimPolicy::Delete {
            debug!(policy = ?volume.reclaim_policy, "volume is retained");
            return Ok(());
        }

        match self.provisioner.delete(volume).await? {
            DeleteOutcome::Deleted => {
                self.store
                    .purge_volume(volume)
                    .await
                    .map_err(|source| ReconcileError::Store {
                        key: volume.name.clone(),
                        source,
                    })?;
            }
            DeleteOutcome::Declined => {}
        }
        Ok(())
    }

    async fn report(&self, key: &str, err: &ReconcileError) {
        if let Err(e) = self.store.record_failure(key, err).await {
            warn!(error = %e, "failed to record permanent failure");
        }
    }
}
