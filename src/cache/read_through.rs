//! Read path combining the region cache with the resilience-wrapped remote service.
//!
//! A result is only cached if no invalidation happened while it was being read, so a read
//! that raced a mutation cannot reinstate pre-mutation values.

use super::{CacheKey, RegionCache};
use crate::error::GuardResult;
use crate::models::{DocumentId, Region};
use crate::remote::{DocumentService, ReadRequest, RequestContext, ValueRange};
use std::sync::Arc;

/// Whether a read may be answered from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConsistency {
    /// Serve a live entry if there is one
    Cached,
    /// Always go upstream; the entry is refreshed with the result
    Fresh,
}

#[derive(Debug, Clone)]
pub struct ReadThroughReader {
    service: Arc<dyn DocumentService>,
    cache: Arc<RegionCache>,
}

impl ReadThroughReader {
    pub fn new(service: Arc<dyn DocumentService>, cache: Arc<RegionCache>) -> Self {
        Self { service, cache }
    }

    pub async fn read(
        &self,
        document_id: &DocumentId,
        region: &Region,
        consistency: ReadConsistency,
        ctx: &RequestContext,
    ) -> GuardResult<ValueRange> {
        let key = CacheKey::values(document_id.clone(), region.clone());

        if consistency == ReadConsistency::Cached {
            if let Some(hit) = self.cache.get(&key).await {
                return Ok(hit);
            }
        }

        let observed = self.cache.generation();
        let request = ReadRequest::new(document_id.clone(), region.clone());
        let values = self.service.read_values(&request, ctx).await?;
        self.cache
            .set_if_current(key, values.clone(), None, observed)
            .await;
        Ok(values)
    }

    pub fn cache(&self) -> &Arc<RegionCache> {
        &self.cache
    }
}
