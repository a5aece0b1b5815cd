//! Collapses concurrent identical read requests into one upstream call.
//!
//! Requests are keyed by a SHA-256 fingerprint of the endpoint and its parameters. The first
//! caller for a key leads: its upstream call runs on its own task, wrapped in a [`Shared`]
//! future published in the in-flight table. Callers arriving while it runs join that future
//! and receive the same result. The task removes its own entry when it completes, so a
//! request issued after completion goes upstream again, and an abandoned leader never leaves
//! a stalled entry behind. Writes never pass through here.
//!
//! A caller only joins an in-flight read that can outlive its own deadline and that started
//! after the last write recorded for the document. Otherwise it leads a fresh call that
//! replaces the entry.

use crate::error::{GuardError, GuardResult};
use crate::models::DocumentId;
use crate::remote::{Endpoint, ValueRange};
use crate::resilience::Deadline;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type SharedRead = Shared<BoxFuture<'static, GuardResult<ValueRange>>>;

#[derive(Clone)]
struct InFlightRead {
    id: u64,
    deadline: Deadline,
    write_epoch: u64,
    read: SharedRead,
}

impl InFlightRead {
    fn joinable_by(&self, deadline: Deadline, write_epoch: u64) -> bool {
        self.write_epoch == write_epoch && self.deadline >= deadline
    }
}

pub struct RequestDeduplicator {
    enabled: bool,
    in_flight: Arc<DashMap<String, InFlightRead>>,
    write_epochs: DashMap<DocumentId, u64>,
    next_id: AtomicU64,
    leaders: AtomicU64,
    joins: AtomicU64,
}

impl std::fmt::Debug for RequestDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("enabled", &self.enabled)
            .field("in_flight", &self.in_flight.len())
            .field("leaders", &self.leaders)
            .field("joins", &self.joins)
            .finish()
    }
}

impl RequestDeduplicator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            in_flight: Arc::new(DashMap::new()),
            write_epochs: DashMap::new(),
            next_id: AtomicU64::new(0),
            leaders: AtomicU64::new(0),
            joins: AtomicU64::new(0),
        }
    }

    /// SHA-256 hex digest of `(endpoint, params)`
    pub fn fingerprint<P: Serialize>(endpoint: Endpoint, params: &P) -> String {
        let mut hasher = Sha256::new();
        hasher.update(endpoint.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(serde_json::to_vec(params).unwrap_or_default());
        hex::encode(hasher.finalize())
    }

    /// Record that a write to `document_id` finished. Reads already in flight for the
    /// document stop accepting joiners.
    pub fn note_write(&self, document_id: &DocumentId) {
        *self.write_epochs.entry(document_id.clone()).or_insert(0) += 1;
    }

    fn write_epoch(&self, document_id: &DocumentId) -> u64 {
        self.write_epochs
            .get(document_id)
            .map(|epoch| *epoch)
            .unwrap_or(0)
    }

    /// Join the in-flight call for `key`, or lead a new one built by `make`.
    ///
    /// `make` must bound its own work by `deadline`; the caller stops waiting at `deadline`
    /// either way.
    pub async fn join_or_lead<F>(
        &self,
        key: String,
        document_id: &DocumentId,
        deadline: Deadline,
        make: F,
    ) -> GuardResult<ValueRange>
    where
        F: FnOnce() -> BoxFuture<'static, GuardResult<ValueRange>>,
    {
        if !self.enabled {
            return make().await;
        }

        let write_epoch = self.write_epoch(document_id);
        let shared = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().joinable_by(deadline, write_epoch) => {
                self.joins.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %key, "Joining in-flight read");
                entry.get().read.clone()
            }
            Entry::Occupied(mut entry) => {
                debug!(fingerprint = %key, "In-flight read is stale or ends too early, leading a new one");
                let lead = self.lead(&key, deadline, write_epoch, make);
                let read = lead.read.clone();
                entry.insert(lead);
                read
            }
            Entry::Vacant(entry) => {
                let lead = self.lead(&key, deadline, write_epoch, make);
                let read = lead.read.clone();
                entry.insert(lead);
                read
            }
        };

        match tokio::time::timeout_at(deadline.instant(), shared).await {
            Ok(result) => result,
            Err(_elapsed) => Err(GuardError::deadline_exceeded(
                "waiting for a deduplicated read",
            )),
        }
    }

    fn lead<F>(&self, key: &str, deadline: Deadline, write_epoch: u64, make: F) -> InFlightRead
    where
        F: FnOnce() -> BoxFuture<'static, GuardResult<ValueRange>>,
    {
        self.leaders.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let table = Arc::clone(&self.in_flight);
        let owned_key = key.to_string();
        let upstream = make();

        let task = tokio::spawn(async move {
            let result = upstream.await;
            table.remove_if(&owned_key, |_, entry| entry.id == id);
            result
        });
        let read = async move {
            task.await.unwrap_or_else(|error| {
                Err(GuardError::Internal(format!(
                    "deduplicated read task failed: {error}"
                )))
            })
        }
        .boxed()
        .shared();

        InFlightRead {
            id,
            deadline,
            write_epoch,
            read,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn leaders(&self) -> u64 {
        self.leaders.load(Ordering::Relaxed)
    }

    pub fn joins(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }
}
