use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::model::*;

/// Generic store failure. The engine surfaces these but never interprets
/// them beyond success/failure.
#[derive(Debug)]
pub enum StoreError {
    NotFound(Ulid),
    Validation(String),
    Network(String),
    Unauthorized,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Validation(msg) => write!(f, "validation failed: {msg}"),
            StoreError::Network(msg) => write!(f, "network error: {msg}"),
            StoreError::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

impl std::error::Error for StoreError {}

/// The remote scheduling store. All calls are asynchronous and may fail;
/// the transport behind them (HTTP client, auth, retries) lives elsewhere.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_resource(&self, id: Ulid) -> Result<ScheduledResource, StoreError>;

    async fn create_resource(&self, new: NewResource) -> Result<ScheduledResource, StoreError>;

    /// Apply a partial update and return the updated record. A compound
    /// patch (start + end) is applied atomically.
    async fn update_fields(
        &self,
        id: Ulid,
        patch: ResourcePatch,
    ) -> Result<ScheduledResource, StoreError>;

    /// Find resources overlapping the queried span, excluding `exclude`
    /// and anything that no longer blocks the schedule.
    async fn check_conflicts(&self, query: ConflictQuery) -> Result<ConflictResult, StoreError>;
}

// ── In-memory store ──────────────────────────────────────────────

/// `RemoteStore` over concurrent maps. Backs tests and demos; latency and
/// failure injection stand in for a real transport.
pub struct InMemoryRemoteStore {
    resources: DashMap<Ulid, ScheduledResource>,
    /// Client id to display label, for conflict entries.
    party_labels: DashMap<Ulid, String>,
    latency: Mutex<Option<Duration>>,
    fail_writes: AtomicBool,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            party_labels: DashMap::new(),
            latency: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, resource: ScheduledResource) {
        self.resources.insert(resource.id, resource);
    }

    pub fn get(&self, id: &Ulid) -> Option<ScheduledResource> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn set_party_label(&self, client_id: Ulid, label: impl Into<String>) {
        self.party_labels.insert(client_id, label.into());
    }

    /// Delay every subsequent call by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().await = latency;
    }

    /// Make subsequent writes fail with a network error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    async fn simulate_transport(&self) {
        let latency = *self.latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writes_allowed(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Network("injected write failure".into()));
        }
        Ok(())
    }

    fn label_for(&self, client_id: Option<Ulid>) -> Option<String> {
        client_id.and_then(|id| self.party_labels.get(&id).map(|e| e.value().clone()))
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get_resource(&self, id: Ulid) -> Result<ScheduledResource, StoreError> {
        self.simulate_transport().await;
        self.get(&id).ok_or(StoreError::NotFound(id))
    }

    async fn create_resource(&self, new: NewResource) -> Result<ScheduledResource, StoreError> {
        self.simulate_transport().await;
        self.check_writes_allowed()?;
        if new.span.end <= new.span.start {
            return Err(StoreError::Validation("end not after start".into()));
        }
        let resource = ScheduledResource {
            id: Ulid::new(),
            span: new.span,
            client_id: new.client_id,
            location: new.location,
            location_detail: new.location_detail,
            notes: new.notes,
            status: new.status,
            payment: new.payment,
        };
        self.resources.insert(resource.id, resource.clone());
        Ok(resource)
    }

    async fn update_fields(
        &self,
        id: Ulid,
        patch: ResourcePatch,
    ) -> Result<ScheduledResource, StoreError> {
        self.simulate_transport().await;
        self.check_writes_allowed()?;
        let mut entry = self
            .resources
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        let mut updated = entry.value().clone();
        patch.apply_to(&mut updated);
        if updated.span.end <= updated.span.start {
            return Err(StoreError::Validation("end not after start".into()));
        }
        *entry.value_mut() = updated.clone();
        Ok(updated)
    }

    async fn check_conflicts(&self, query: ConflictQuery) -> Result<ConflictResult, StoreError> {
        self.simulate_transport().await;
        let mut conflicts: Vec<ConflictEntry> = self
            .resources
            .iter()
            .filter(|e| Some(*e.key()) != query.exclude)
            .filter(|e| e.value().status.blocks_schedule())
            .filter(|e| e.value().span.overlaps(&query.span))
            .map(|e| {
                let r = e.value();
                ConflictEntry {
                    id: r.id,
                    span: r.span,
                    other_party: self.label_for(r.client_id),
                    location: r.location,
                    status: r.status,
                }
            })
            .collect();
        conflicts.sort_by_key(|c| c.span.start);
        Ok(ConflictResult { conflicts })
    }
}
