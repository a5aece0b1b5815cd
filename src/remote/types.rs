use crate::constants::endpoints;
use crate::models::{DocumentId, IntentId, IntentKind, Region};
use crate::resilience::Deadline;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Logical remote endpoint; circuit breakers are keyed by these names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    BatchUpdate,
    ReadValues,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatchUpdate => endpoints::BATCH_UPDATE,
            Self::ReadValues => endpoints::READ_VALUES,
        }
    }

    /// Read-only endpoints may be deduplicated
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadValues)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One intent translated into a remote sub-operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOperation {
    pub intent_id: IntentId,
    #[serde(flatten)]
    pub kind: IntentKind,
    pub region: Region,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
    pub document_id: DocumentId,
    pub operations: Vec<SubOperation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOperationReply {
    pub success: bool,
    pub cells_affected: Option<u64>,
    pub error: Option<String>,
}

impl SubOperationReply {
    pub fn applied(cells_affected: Option<u64>) -> Self {
        Self {
            success: true,
            cells_affected,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            cells_affected: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdateResponse {
    /// One reply per sub-operation, in request order
    pub replies: Vec<SubOperationReply>,
    pub revision: Option<String>,
}

impl BatchUpdateResponse {
    pub fn all_succeeded(&self) -> bool {
        self.replies.iter().all(|reply| reply.success)
    }

    pub fn first_error(&self) -> Option<&str> {
        self.replies
            .iter()
            .find(|reply| !reply.success)
            .map(|reply| reply.error.as_deref().unwrap_or("sub-operation failed"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadRequest {
    pub document_id: DocumentId,
    pub region: Region,
}

impl ReadRequest {
    pub fn new(document_id: DocumentId, region: Region) -> Self {
        Self {
            document_id,
            region,
        }
    }
}

/// Values of a region, row-major from the region's top-left corner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub region: Region,
    pub values: Vec<Vec<Value>>,
    pub revision: Option<String>,
}

impl ValueRange {
    pub fn row_count(&self) -> usize {
        self.values.len()
    }

    pub fn column_count(&self) -> usize {
        self.values.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Value at a zero-based offset from the top-left corner; missing cells read as null
    pub fn value_at(&self, row: usize, column: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.values
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// SHA-256 hex digest of the values, used for checksum preconditions
    pub fn checksum(&self) -> String {
        let encoded = serde_json::to_vec(&self.values).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

/// Per-request metadata carried through every layer of the stack
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub deadline: Deadline,
}

impl RequestContext {
    pub fn new(deadline: Deadline) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            deadline,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Deadline::after(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checksum_depends_only_on_values() {
        let a = ValueRange {
            region: Region::parse("S!A1:B1").unwrap(),
            values: vec![vec![json!(1), json!("x")]],
            revision: Some("1".into()),
        };
        let mut b = a.clone();
        b.revision = Some("2".into());
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.checksum().len(), 64);

        b.values[0][0] = json!(2);
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn value_at_reads_missing_cells_as_null() {
        let range = ValueRange {
            region: Region::parse("S!A1:C2").unwrap(),
            values: vec![vec![json!(1)], vec![json!(2), json!(3)]],
            revision: None,
        };
        assert_eq!(range.column_count(), 2);
        assert_eq!(range.value_at(0, 1), &Value::Null);
        assert_eq!(range.value_at(1, 1), &json!(3));
        assert_eq!(range.value_at(5, 5), &Value::Null);
    }
}
