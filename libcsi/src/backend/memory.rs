//! In-memory storage backend for CSI.
//!
//! [`MemoryBackend`] implements [`CsiIdentity`] and [`CsiController`] without
//! touching any real storage.  It is the reference plugin used by the test
//! suites and for running the provisioner locally against
//! [`CsiServer`](crate::CsiServer), and it can misbehave on demand: errors
//! and latency can be injected and every call is counted.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, instrument};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::types::*;

/// Plugin name reported by [`MemoryBackend`] unless overridden.
pub const MEMORY_PLUGIN_NAME: &str = "rk8s.memory.csi";

/// Capacities are rounded up to a multiple of this many bytes.
pub const ALLOCATION_UNIT: u64 = 1024 * 1024;

/// Concrete CSI backend that keeps all volumes in memory.
///
/// # Thread safety
///
/// Volume state lives in concurrent maps ([`DashMap`]), so multiple Tokio
/// tasks may operate on different volumes concurrently.
pub struct MemoryBackend {
    plugin_name: String,
    /// Total bytes the backend may hand out, `None` for unlimited.
    capacity_limit: Option<u64>,
    topology: bool,
    /// Volume metadata, keyed by volume ID.
    volumes: DashMap<VolumeId, Volume>,
    /// Maps the caller-supplied volume name to the assigned [`VolumeId`].
    /// Used to make `create_volume` idempotent; a create holds the name's
    /// entry until the volume is inserted.
    volume_names: DashMap<String, VolumeId>,
    /// Bytes handed out to live volumes.
    allocated: AtomicU64,
    /// Errors returned, in order, by the next controller calls.
    faults: Mutex<VecDeque<CsiError>>,
    latency: Mutex<Option<Duration>>,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend with unlimited capacity.
    pub fn new() -> Self {
        Self {
            plugin_name: MEMORY_PLUGIN_NAME.to_owned(),
            capacity_limit: None,
            topology: false,
            volumes: DashMap::new(),
            volume_names: DashMap::new(),
            allocated: AtomicU64::new(0),
            faults: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Limit the total number of bytes this backend can allocate.
    pub fn with_capacity_limit(mut self, bytes: u64) -> Self {
        self.capacity_limit = Some(bytes);
        self
    }

    /// Advertise [`PluginCapability::VolumeAccessibilityConstraints`].
    pub fn with_topology(mut self) -> Self {
        self.topology = true;
        self
    }

    /// Make the next controller call fail with `err`.  Multiple injected
    /// errors are returned in FIFO order.
    pub fn inject_error(&self, err: CsiError) {
        self.faults
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(err);
    }

    /// Delay every subsequent controller call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner()) = Some(latency);
    }

    /// Number of `create_volume` calls received so far.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete_volume` calls received so far.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Number of volumes currently allocated.
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Whether a volume with `volume_id` exists.
    pub fn contains(&self, volume_id: &VolumeId) -> bool {
        self.volumes.contains_key(volume_id)
    }

    /// Account `bytes` against the capacity limit.
    fn reserve(&self, bytes: u64) -> Result<(), CsiError> {
        let limit = self.capacity_limit.unwrap_or(u64::MAX);
        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(bytes).filter(|total| *total <= limit)
            })
            .map(|_| ())
            .map_err(|used| {
                CsiError::ResourceExhausted(format!(
                    "requested {bytes} bytes, {} bytes available",
                    limit.saturating_sub(used)
                ))
            })
    }

    async fn before_call(&self) -> Result<(), CsiError> {
        let latency = *self.latency.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn round_up(bytes: u64) -> u64 {
    bytes.div_ceil(ALLOCATION_UNIT).max(1) * ALLOCATION_UNIT
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for MemoryBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.plugin_name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        let mut caps = vec![PluginCapability::ControllerService];
        if self.topology {
            caps.push(PluginCapability::VolumeAccessibilityConstraints);
        }
        Ok(caps)
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for MemoryBackend {
    #[instrument(skip(self), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("volume name is required".into()));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "at least one volume capability is required".into(),
            ));
        }
        let capacity = round_up(req.capacity_bytes);

        // Idempotency: a repeated name returns the existing volume as long as
        // the request is compatible with it.  The entry stays locked until
        // the new volume is recorded, so racing creates of one name agree.
        let entry = self.volume_names.entry(req.name.clone());
        if let Entry::Occupied(existing) = &entry
            && let Some(vol) = self.volumes.get(existing.get()).map(|r| r.clone())
        {
            if vol.capacity_bytes != capacity {
                return Err(CsiError::AlreadyExists(req.name));
            }
            debug!(name = %req.name, id = %vol.volume_id, "returning existing volume for idempotent create");
            return Ok(vol);
        }

        self.reserve(capacity)?;

        let vol_id = VolumeId(format!("mem-{}", uuid::Uuid::new_v4()));
        let volume = Volume {
            volume_id: vol_id.clone(),
            capacity_bytes: capacity,
            parameters: req.parameters,
            volume_context: HashMap::from([
                ("backend".to_owned(), "memory".to_owned()),
                ("name".to_owned(), req.name.clone()),
            ]),
            accessible_topology: req.accessibility_requirements,
        };

        self.volumes.insert(vol_id.clone(), volume.clone());
        entry.insert(vol_id.clone());

        info!(%vol_id, capacity, "volume created");
        Ok(volume)
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        let Some((_, vol)) = self.volumes.remove(volume_id) else {
            return Err(CsiError::NotFound(volume_id.to_string()));
        };
        self.allocated
            .fetch_sub(vol.capacity_bytes, Ordering::SeqCst);
        if let Some(name) = vol.volume_context.get("name") {
            self.volume_names.remove_if(name, |_, id| id == volume_id);
        }

        info!(%volume_id, "volume deleted");
        Ok(())
    }
}
