//! Cache keys: `(document, region, query shape)`.

use crate::constants::query_shapes;
use crate::models::{DocumentId, Region};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    document_id: DocumentId,
    region: Region,
    shape: String,
}

impl CacheKey {
    pub fn new(document_id: DocumentId, region: Region, shape: impl Into<String>) -> Self {
        Self {
            document_id,
            region,
            shape: shape.into(),
        }
    }

    /// Key for a plain values read
    pub fn values(document_id: DocumentId, region: Region) -> Self {
        Self::new(document_id, region, query_shapes::VALUES)
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn shape(&self) -> &str {
        &self.shape
    }

    /// Whether a mutation of `region` in `document_id` may have changed this entry
    pub fn overlaps(&self, document_id: &DocumentId, region: &Region) -> bool {
        &self.document_id == document_id && self.region.overlaps(region)
    }
}

/// Rendered as `document/region/shape`, the form pattern invalidation matches against
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.document_id, self.region, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_document_region_shape() {
        let key = CacheKey::values("budget".into(), Region::parse("Sheet1!A1:B2").unwrap());
        assert_eq!(key.to_string(), "budget/Sheet1!A1:B2/values");
    }

    #[test]
    fn overlap_requires_same_document() {
        let key = CacheKey::values("a".into(), Region::parse("S!A1:C3").unwrap());
        let region = Region::parse("S!B2").unwrap();
        assert!(key.overlaps(&"a".into(), &region));
        assert!(!key.overlaps(&"b".into(), &region));
        assert!(!key.overlaps(&"a".into(), &Region::parse("S!D4").unwrap()));
    }
}
