//! # Region Cache
//!
//! Read-through cache over remote document state keyed by `(document, region, shape)`,
//! with region-overlap and glob-pattern invalidation.

pub mod key;
pub mod read_through;
pub mod region_cache;

pub use key::CacheKey;
pub use read_through::{ReadConsistency, ReadThroughReader};
pub use region_cache::{CacheStats, CachedValue, InvalidationScope, RegionCache};
