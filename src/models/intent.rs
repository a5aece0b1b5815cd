//! # Intents
//!
//! A single proposed atomic effect on one region of one document. The layer only inspects
//! `target`, `kind` facts and `metadata`; the payload is passed through untouched.

use super::ids::{DocumentId, IntentId};
use super::region::Region;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

/// Operation category of an intent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentKind {
    WriteValues,
    ClearValues,
    FormatCells,
    MergeCells,
    SortRange,
    InsertDimension,
    DeleteDimension,
    AddSheet,
    DeleteSheet,
    CreateChart,
    Custom { name: String },
}

impl IntentKind {
    /// Structural kinds shift coordinates of everything after them on the sheet
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InsertDimension | Self::DeleteDimension | Self::AddSheet | Self::DeleteSheet
        )
    }

    /// Whether writing captured values back undoes the effect
    pub fn is_value_restorable(&self) -> bool {
        matches!(self, Self::WriteValues | Self::ClearValues | Self::SortRange)
    }

    /// Kinds that discard existing values unless the caller says otherwise
    pub fn is_destructive_by_default(&self) -> bool {
        matches!(
            self,
            Self::WriteValues
                | Self::ClearValues
                | Self::SortRange
                | Self::DeleteDimension
                | Self::DeleteSheet
        )
    }

    /// Whether the kind writes cell values, and so needs a bounded target
    pub fn writes_values(&self) -> bool {
        matches!(self, Self::WriteValues)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::WriteValues => "write_values",
            Self::ClearValues => "clear_values",
            Self::FormatCells => "format_cells",
            Self::MergeCells => "merge_cells",
            Self::SortRange => "sort_range",
            Self::InsertDimension => "insert_dimension",
            Self::DeleteDimension => "delete_dimension",
            Self::AddSheet => "add_sheet",
            Self::DeleteSheet => "delete_sheet",
            Self::CreateChart => "create_chart",
            Self::Custom { name } => name,
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    pub estimated_cells_affected: u64,
    pub destructive: bool,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentTarget {
    pub document_id: DocumentId,
    pub region: Region,
}

/// A proposed effect, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    id: IntentId,
    target: IntentTarget,
    #[serde(flatten)]
    kind: IntentKind,
    payload: Value,
    metadata: IntentMetadata,
}

impl Intent {
    /// Build an intent with metadata derived from the region and kind: the bounded cell count
    /// (zero when unbounded), destructive per kind, normal priority.
    pub fn new(
        document_id: impl Into<DocumentId>,
        region: Region,
        kind: IntentKind,
        payload: Value,
    ) -> Self {
        let metadata = IntentMetadata {
            estimated_cells_affected: region.cell_count().unwrap_or(0),
            destructive: kind.is_destructive_by_default(),
            priority: Priority::Normal,
        };
        Self {
            id: IntentId::new(),
            target: IntentTarget {
                document_id: document_id.into(),
                region,
            },
            kind,
            payload,
            metadata,
        }
    }

    pub fn with_estimated_cells(mut self, cells: u64) -> Self {
        self.metadata.estimated_cells_affected = cells;
        self
    }

    pub fn with_destructive(mut self, destructive: bool) -> Self {
        self.metadata.destructive = destructive;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn id(&self) -> IntentId {
        self.id
    }

    pub fn target(&self) -> &IntentTarget {
        &self.target
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.target.document_id
    }

    pub fn region(&self) -> &Region {
        &self.target.region
    }

    pub fn kind(&self) -> &IntentKind {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn metadata(&self) -> &IntentMetadata {
        &self.metadata
    }

    /// Region used for ordering: structural kinds claim their whole sheet
    pub fn footprint(&self) -> Region {
        if self.kind.is_structural() {
            self.target.region.sheet_region()
        } else {
            self.target.region.clone()
        }
    }
}

/// Group intents by target document, keeping first-seen document order and the input
/// order within each group
pub fn partition_by_document<I: Borrow<Intent>>(
    intents: impl IntoIterator<Item = I>,
) -> Vec<(DocumentId, Vec<I>)> {
    let mut groups: Vec<(DocumentId, Vec<I>)> = Vec::new();
    for intent in intents {
        let document_id = intent.borrow().document_id();
        match groups.iter_mut().find(|(id, _)| id == document_id) {
            Some((_, group)) => group.push(intent),
            None => groups.push((document_id.clone(), vec![intent])),
        }
    }
    groups
}
