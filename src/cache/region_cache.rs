//! In-process cache of region reads using Moka.
//!
//! Entries carry their own TTL. Invalidation is either by region (entries of the same
//! document whose region overlaps) or by a glob pattern over the rendered key.
//!
//! Every invalidation advances a generation counter. A read that observed the generation
//! before going upstream stores its result with [`RegionCache::set_if_current`], which
//! discards it if any invalidation happened in between.

use super::CacheKey;
use crate::config::CacheConfig;
use crate::models::{DocumentId, Region};
use crate::remote::ValueRange;
use chrono::{DateTime, Utc};
use moka::Expiry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CachedValue {
    pub value: ValueRange,
    pub ttl: Duration,
    pub expires_at: DateTime<Utc>,
}

struct PerEntryExpiry;

impl Expiry<CacheKey, CachedValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// What to drop from the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Entries of `document_id` whose region overlaps `region`
    Region {
        document_id: DocumentId,
        region: Region,
    },
    /// Glob (`*`, `?`) over `document/region/shape`
    Pattern(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub invalidations: u64,
    pub entries: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

pub struct RegionCache {
    enabled: bool,
    cache: moka::future::Cache<CacheKey, CachedValue>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    invalidations: AtomicU64,
    generation: AtomicU64,
}

impl std::fmt::Debug for RegionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionCache")
            .field("enabled", &self.enabled)
            .field("max_capacity", &self.cache.policy().max_capacity())
            .field("entry_count", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl RegionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(PerEntryExpiry)
            .build();

        debug!(
            enabled = config.enabled,
            max_capacity = config.max_entries,
            ttl_seconds = config.default_ttl_seconds,
            "Region cache created"
        );

        Self {
            enabled: config.enabled,
            cache,
            default_ttl: config.default_ttl(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn get(&self, key: &CacheKey) -> Option<ValueRange> {
        if !self.enabled {
            return None;
        }

        match self.cache.get(key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache HIT");
                Some(entry.value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache MISS");
                None
            }
        }
    }

    /// Store `value` for `ttl`, or the configured default TTL
    pub async fn set(&self, key: CacheKey, value: ValueRange, ttl: Option<Duration>) {
        if !self.enabled {
            return;
        }

        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        debug!(key = %key, ttl_ms = ttl.as_millis(), "Cache SET");
        self.cache
            .insert(
                key,
                CachedValue {
                    value,
                    ttl,
                    expires_at,
                },
            )
            .await;
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `value` only if no invalidation happened since `observed` was read from
    /// [`generation`](Self::generation). Returns whether the entry was kept.
    pub async fn set_if_current(
        &self,
        key: CacheKey,
        value: ValueRange,
        ttl: Option<Duration>,
        observed: u64,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        if self.generation() != observed {
            debug!(key = %key, "Cache SET skipped, invalidated while reading");
            return false;
        }

        self.set(key.clone(), value, ttl).await;
        // An invalidation racing the insert may have scanned before it landed
        if self.generation() != observed {
            self.cache.invalidate(&key).await;
            return false;
        }
        true
    }

    /// Drop every entry in `scope`, returning how many were removed
    pub async fn invalidate(&self, scope: &InvalidationScope) -> usize {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let matcher: Box<dyn Fn(&CacheKey) -> bool + Send + Sync> = match scope {
            InvalidationScope::Region {
                document_id,
                region,
            } => {
                let document_id = document_id.clone();
                let region = region.clone();
                Box::new(move |key| key.overlaps(&document_id, &region))
            }
            InvalidationScope::Pattern(pattern) => match glob_to_regex(pattern) {
                Some(regex) => Box::new(move |key| regex.is_match(&key.to_string())),
                None => {
                    warn!(pattern = %pattern, "Unusable invalidation pattern, nothing removed");
                    Box::new(|_| false)
                }
            },
        };

        let doomed: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|(key, _)| matcher(key.as_ref()))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        for key in &doomed {
            self.cache.invalidate(key).await;
        }

        self.invalidations
            .fetch_add(doomed.len() as u64, Ordering::Relaxed);
        debug!(scope = ?scope, removed = doomed.len(), "Cache invalidated");
        doomed.len()
    }

    pub async fn invalidate_region(&self, document_id: &DocumentId, region: &Region) -> usize {
        self.invalidate(&InvalidationScope::Region {
            document_id: document_id.clone(),
            region: region.clone(),
        })
        .await
    }

    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.invalidate(&InvalidationScope::Pattern(pattern.to_string()))
            .await
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
        }
    }
}

/// Anchored regex for a `*` / `?` glob; everything else matches literally
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let translated = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{translated}$")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> RegionCache {
        RegionCache::new(&CacheConfig::default())
    }

    fn key(doc: &str, region: &str) -> CacheKey {
        CacheKey::values(doc.into(), Region::parse(region).unwrap())
    }

    fn range(region: &str) -> ValueRange {
        ValueRange {
            region: Region::parse(region).unwrap(),
            values: vec![vec![serde_json::json!("x")]],
            revision: None,
        }
    }

    #[tokio::test]
    async fn set_then_get_hits() {
        let cache = cache();
        cache.set(key("d", "S!A1"), range("S!A1"), None).await;

        assert_eq!(cache.get(&key("d", "S!A1")).await, Some(range("S!A1")));
        assert_eq!(cache.get(&key("d", "S!A2")).await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache = cache();
        cache
            .set(key("d", "S!A1"), range("S!A1"), Some(Duration::from_millis(5)))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get(&key("d", "S!A1")).await, None);
    }

    #[tokio::test]
    async fn region_invalidation_is_scoped_to_overlaps() {
        let cache = cache();
        cache.set(key("d", "S!A1:B2"), range("S!A1"), None).await;
        cache.set(key("d", "S!D1:E2"), range("S!D1"), None).await;
        cache.set(key("other", "S!A1:B2"), range("S!A1"), None).await;

        let removed = cache
            .invalidate_region(&"d".into(), &Region::parse("S!B2:C3").unwrap())
            .await;

        assert_eq!(removed, 1);
        assert!(cache.get(&key("d", "S!A1:B2")).await.is_none());
        assert!(cache.get(&key("d", "S!D1:E2")).await.is_some());
        assert!(cache.get(&key("other", "S!A1:B2")).await.is_some());
    }

    #[tokio::test]
    async fn pattern_invalidation_matches_rendered_key() {
        let cache = cache();
        cache.set(key("d", "Sheet1!A1"), range("Sheet1!A1"), None).await;
        cache.set(key("d", "Sheet2!A1"), range("Sheet2!A1"), None).await;

        assert_eq!(cache.invalidate_pattern("d/Sheet1!*").await, 1);
        assert!(cache.get(&key("d", "Sheet2!A1")).await.is_some());
        assert_eq!(cache.invalidate_pattern("d/Sheet?!A1/values").await, 1);
        assert_eq!(cache.stats().await.invalidations, 2);
    }

    #[tokio::test]
    async fn result_read_before_an_invalidation_is_not_stored() {
        let cache = cache();
        let observed = cache.generation();

        cache
            .invalidate_region(&"d".into(), &Region::parse("S!A1:C3").unwrap())
            .await;
        let kept = cache
            .set_if_current(key("d", "S!A1"), range("S!A1"), None, observed)
            .await;

        assert!(!kept);
        assert!(cache.get(&key("d", "S!A1")).await.is_none());
        assert!(
            cache
                .set_if_current(key("d", "S!A1"), range("S!A1"), None, cache.generation())
                .await
        );
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let cache = RegionCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.set(key("d", "S!A1"), range("S!A1"), None).await;
        assert!(cache.get(&key("d", "S!A1")).await.is_none());
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let regex = glob_to_regex("d/S!A1:B2/values").unwrap();
        assert!(regex.is_match("d/S!A1:B2/values"));
        assert!(!glob_to_regex("d.x").unwrap().is_match("dax"));
        assert!(glob_to_regex("*").unwrap().is_match("anything/at/all"));
    }
}
