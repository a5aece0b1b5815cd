//! Snapshot storage.
//!
//! [`SnapshotStore`] is the seam for durable backends; [`InMemorySnapshotStore`] keeps
//! snapshots in a concurrent map for the life of the process.

use crate::error::GuardResult;
use crate::models::{DocumentId, IntentId, Region, SnapshotId};
use crate::remote::ValueRange;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

/// Values of one region as read just before the mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedRegion {
    /// The region the intents targeted
    pub region: Region,
    /// What was read; its region may be clipped to the data extent
    pub values: ValueRange,
}

/// Prior state of every region a submission touched in one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub document_id: DocumentId,
    pub captured_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub regions: Vec<CapturedRegion>,
    pub intent_ids: Vec<IntentId>,
}

impl Snapshot {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn cell_count(&self) -> u64 {
        self.regions
            .iter()
            .flat_map(|captured| captured.values.values.iter())
            .map(|row| row.iter().filter(|value| !value.is_null()).count() as u64)
            .sum()
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            id: self.id,
            document_id: self.document_id.clone(),
            captured_at: self.captured_at,
            expires_at: self.expires_at,
            regions: self.regions.iter().map(|c| c.region.clone()).collect(),
            cell_count: self.cell_count(),
        }
    }
}

/// Listing view of a snapshot, without the captured values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotMetadata {
    pub id: SnapshotId,
    pub document_id: DocumentId,
    pub captured_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub regions: Vec<Region>,
    pub cell_count: u64,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    /// Store a snapshot; it must be readable by `get` once this returns
    async fn put(&self, snapshot: Snapshot) -> GuardResult<()>;

    async fn get(&self, id: SnapshotId) -> GuardResult<Option<Snapshot>>;

    async fn remove(&self, id: SnapshotId) -> GuardResult<Option<Snapshot>>;

    async fn list(&self) -> GuardResult<Vec<SnapshotMetadata>>;

    /// Drop every snapshot expired at `now`, returning how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> GuardResult<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store bounded to `max_retained` snapshots
#[derive(Debug)]
pub struct InMemorySnapshotStore {
    snapshots: DashMap<SnapshotId, Snapshot>,
    max_retained: usize,
}

impl InMemorySnapshotStore {
    pub fn new(max_retained: usize) -> Self {
        Self {
            snapshots: DashMap::new(),
            max_retained: max_retained.max(1),
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .snapshots
            .iter()
            .min_by_key(|entry| entry.captured_at)
            .map(|entry| *entry.key());

        if let Some(id) = oldest {
            self.snapshots.remove(&id);
            warn!(snapshot_id = %id, max_retained = self.max_retained, "Snapshot store full, evicted oldest snapshot");
        }
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn put(&self, snapshot: Snapshot) -> GuardResult<()> {
        if self.snapshots.len() >= self.max_retained {
            self.purge_expired(Utc::now()).await?;
        }
        while self.snapshots.len() >= self.max_retained {
            self.evict_oldest();
        }

        debug!(snapshot_id = %snapshot.id, document_id = %snapshot.document_id, "Snapshot stored");
        self.snapshots.insert(snapshot.id, snapshot);
        Ok(())
    }

    async fn get(&self, id: SnapshotId) -> GuardResult<Option<Snapshot>> {
        Ok(self.snapshots.get(&id).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, id: SnapshotId) -> GuardResult<Option<Snapshot>> {
        Ok(self.snapshots.remove(&id).map(|(_, snapshot)| snapshot))
    }

    async fn list(&self) -> GuardResult<Vec<SnapshotMetadata>> {
        let mut listing: Vec<SnapshotMetadata> = self
            .snapshots
            .iter()
            .map(|entry| entry.value().metadata())
            .collect();
        listing.sort_by_key(|metadata| metadata.captured_at);
        Ok(listing)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> GuardResult<usize> {
        let before = self.snapshots.len();
        self.snapshots
            .retain(|_, snapshot| !snapshot.is_expired_at(now));
        Ok(before.saturating_sub(self.snapshots.len()))
    }

    fn len(&self) -> usize {
        self.snapshots.len()
    }
}
