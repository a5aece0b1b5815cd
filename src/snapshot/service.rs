//! # Snapshot Service
//!
//! Captures the prior values of every region a submission is about to change, hands out an
//! opaque [`SnapshotId`], and turns a stored snapshot back into the intents that restore it.
//!
//! Capture reads go through the resilience stack with fresh consistency, and the snapshot is
//! stored before `capture_regions` returns, so nothing is written to a region before its prior
//! state is readable. Snapshots expire after the configured retention window; expired
//! snapshots are dropped on access and by an optional background sweeper.

use super::diff::diff_region;
use super::store::{CapturedRegion, Snapshot, SnapshotMetadata, SnapshotStore};
use crate::cache::{ReadConsistency, ReadThroughReader};
use crate::config::SnapshotConfig;
use crate::error::{GuardError, GuardResult};
use crate::logging::log_snapshot_operation;
use crate::models::{
    DiffSource, DocumentId, Intent, IntentId, IntentKind, MutationDiff, Region, SnapshotId,
};
use crate::remote::{RequestContext, ValueRange};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct SnapshotService {
    store: Arc<dyn SnapshotStore>,
    reader: ReadThroughReader,
    config: SnapshotConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotService")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("sweeping", &self.is_sweeping())
            .finish()
    }
}

impl SnapshotService {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        reader: ReadThroughReader,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            store,
            reader,
            config,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Capture one region
    pub async fn capture(
        &self,
        document_id: &DocumentId,
        region: &Region,
        ctx: &RequestContext,
    ) -> GuardResult<Snapshot> {
        self.capture_regions(document_id, std::slice::from_ref(region), &[], ctx)
            .await
    }

    /// Capture every region into one snapshot. Duplicate regions are read once.
    pub async fn capture_regions(
        &self,
        document_id: &DocumentId,
        regions: &[Region],
        intent_ids: &[IntentId],
        ctx: &RequestContext,
    ) -> GuardResult<Snapshot> {
        let mut unique: Vec<&Region> = Vec::with_capacity(regions.len());
        for region in regions {
            if !unique.contains(&region) {
                unique.push(region);
            }
        }

        let mut captured = Vec::with_capacity(unique.len());
        for region in unique {
            let values = self
                .reader
                .read(document_id, region, ReadConsistency::Fresh, ctx)
                .await?;
            captured.push(CapturedRegion {
                region: region.clone(),
                values,
            });
        }

        let captured_at = Utc::now();
        let retention = chrono::Duration::from_std(self.config.retention())
            .map_err(|e| GuardError::Internal(format!("snapshot retention out of range: {e}")))?;
        let snapshot = Snapshot {
            id: SnapshotId::new(),
            document_id: document_id.clone(),
            captured_at,
            expires_at: captured_at + retention,
            regions: captured,
            intent_ids: intent_ids.to_vec(),
        };

        self.store.put(snapshot.clone()).await?;
        let details = format!("{} region(s), {} cell(s)", snapshot.regions.len(), snapshot.cell_count());
        log_snapshot_operation("capture", snapshot.id, document_id, "stored", Some(&details));
        Ok(snapshot)
    }

    /// A live snapshot; expired ones are dropped and reported as not found
    pub async fn get(&self, id: SnapshotId) -> GuardResult<Snapshot> {
        match self.store.get(id).await? {
            Some(snapshot) if snapshot.is_expired_at(Utc::now()) => {
                self.store.remove(id).await?;
                log_snapshot_operation("get", id, &snapshot.document_id, "expired", None);
                Err(GuardError::SnapshotNotFound { snapshot_id: id })
            }
            Some(snapshot) => Ok(snapshot),
            None => Err(GuardError::SnapshotNotFound { snapshot_id: id }),
        }
    }

    /// Remove a snapshot once it has been restored
    pub async fn consume(&self, id: SnapshotId) -> GuardResult<()> {
        if let Some(snapshot) = self.store.remove(id).await? {
            log_snapshot_operation("consume", id, &snapshot.document_id, "removed", None);
        }
        Ok(())
    }

    pub async fn list(&self) -> GuardResult<Vec<SnapshotMetadata>> {
        let now = Utc::now();
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|metadata| metadata.expires_at > now)
            .collect())
    }

    pub fn retained(&self) -> usize {
        self.store.len()
    }

    pub async fn sweep_expired(&self) -> GuardResult<usize> {
        let removed = self.store.purge_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed = removed, "Expired snapshots swept");
        }
        Ok(removed)
    }

    /// Intents that put the captured values back: clear each region, then rewrite what was there
    pub fn restore_intents(snapshot: &Snapshot) -> Vec<Intent> {
        let mut intents = Vec::with_capacity(snapshot.regions.len() * 2);
        for captured in &snapshot.regions {
            intents.push(
                Intent::new(
                    snapshot.document_id.clone(),
                    captured.region.clone(),
                    IntentKind::ClearValues,
                    json!({}),
                )
                .with_destructive(false),
            );

            if captured.values.values.is_empty() {
                continue;
            }
            intents.push(
                Intent::new(
                    snapshot.document_id.clone(),
                    restore_target(&captured.values),
                    IntentKind::WriteValues,
                    json!({ "values": captured.values.values }),
                )
                .with_destructive(false),
            );
        }
        intents
    }

    /// Cell-level diff of each captured region against its post-mutation read
    pub fn diff(&self, snapshot: &Snapshot, after: &[ValueRange]) -> MutationDiff {
        MutationDiff {
            regions: snapshot
                .regions
                .iter()
                .zip(after)
                .map(|(captured, after)| {
                    diff_region(
                        &captured.region,
                        &captured.values,
                        after,
                        self.config.max_diff_samples,
                        DiffSource::Snapshot,
                    )
                })
                .collect(),
        }
    }

    /// Read every captured region again, fresh
    pub async fn read_current(
        &self,
        snapshot: &Snapshot,
        ctx: &RequestContext,
    ) -> GuardResult<Vec<ValueRange>> {
        let mut current = Vec::with_capacity(snapshot.regions.len());
        for captured in &snapshot.regions {
            current.push(
                self.reader
                    .read(&snapshot.document_id, &captured.region, ReadConsistency::Fresh, ctx)
                    .await?,
            );
        }
        Ok(current)
    }

    /// Start the periodic expiry sweep. Needs a running tokio runtime.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            warn!("Snapshot sweeper already running");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, snapshot sweeper not started");
            return;
        };

        let store = Arc::clone(&self.store);
        let period = self.config.sweep_interval();
        info!(interval_seconds = period.as_secs(), "Starting snapshot sweeper");

        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match store.purge_expired(Utc::now()).await {
                    Ok(0) => debug!("No expired snapshots"),
                    Ok(removed) => info!(removed = removed, "Expired snapshots swept"),
                    Err(e) => error!(error = %e, "Snapshot sweep failed"),
                }
            }
        }));
    }

    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            info!("Stopping snapshot sweeper");
            handle.abort();
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

impl Drop for SnapshotService {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Bounded region covering exactly the captured matrix
fn restore_target(values: &ValueRange) -> Region {
    let rows = u32::try_from(values.row_count()).unwrap_or(u32::MAX);
    let columns = u32::try_from(values.column_count()).unwrap_or(u32::MAX);
    values.region.with_size(rows, columns)
}
