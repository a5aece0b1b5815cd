//! # Call Plan Compilation
//!
//! Turns one document's approved intents into the fewest ordered remote batch calls.
//!
//! Each intent is assigned a layer one past the highest layer of any earlier intent whose
//! footprint overlaps its own; intents with nothing overlapping before them land in layer 0.
//! Every layer becomes one call (or several consecutive calls when it holds more than the
//! per-call sub-operation limit). The number of layers is the length of the longest chain of
//! overlapping intents, which no valid ordering can beat.
//!
//! Within a call, sub-operations are ordered by priority (highest first), keeping submission
//! order among equals. Intents in one layer never overlap each other, so that reordering is safe.

use crate::models::{DocumentId, Intent, IntentId, Region};
use crate::remote::{BatchUpdateRequest, SubOperation};
use std::cmp::Reverse;

/// One remote batch call
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCall {
    pub index: usize,
    pub layer: usize,
    pub intents: Vec<Intent>,
}

impl CompiledCall {
    pub fn request(&self, document_id: &DocumentId) -> BatchUpdateRequest {
        BatchUpdateRequest {
            document_id: document_id.clone(),
            operations: self
                .intents
                .iter()
                .map(|intent| SubOperation {
                    intent_id: intent.id(),
                    kind: intent.kind().clone(),
                    region: intent.region().clone(),
                    payload: intent.payload().clone(),
                })
                .collect(),
        }
    }

    pub fn intent_ids(&self) -> Vec<IntentId> {
        self.intents.iter().map(Intent::id).collect()
    }

    /// Regions whose cached values this call may invalidate
    pub fn footprints(&self) -> Vec<Region> {
        self.intents.iter().map(Intent::footprint).collect()
    }
}

/// Ordered calls for one document
#[derive(Debug, Clone, PartialEq)]
pub struct CallPlan {
    pub document_id: DocumentId,
    pub calls: Vec<CompiledCall>,
}

impl CallPlan {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn intent_count(&self) -> usize {
        self.calls.iter().map(|call| call.intents.len()).sum()
    }

    pub fn layer_count(&self) -> usize {
        self.calls.last().map_or(0, |call| call.layer + 1)
    }

    /// Index of the call holding `intent_id`
    pub fn call_of(&self, intent_id: IntentId) -> Option<usize> {
        self.calls
            .iter()
            .position(|call| call.intents.iter().any(|intent| intent.id() == intent_id))
    }
}

/// Compile one document's intents, in submission order, into ordered calls
pub fn compile_batch(
    document_id: &DocumentId,
    intents: Vec<Intent>,
    max_operations_per_call: usize,
) -> CallPlan {
    let max_operations_per_call = max_operations_per_call.max(1);
    let footprints: Vec<Region> = intents.iter().map(Intent::footprint).collect();

    let mut layers: Vec<usize> = Vec::with_capacity(intents.len());
    for (i, footprint) in footprints.iter().enumerate() {
        let layer = (0..i)
            .filter(|&j| footprints[j].overlaps(footprint))
            .map(|j| layers[j] + 1)
            .max()
            .unwrap_or(0);
        layers.push(layer);
    }

    let layer_count = layers.iter().max().map_or(0, |max| max + 1);
    let mut grouped: Vec<Vec<Intent>> = vec![Vec::new(); layer_count];
    for (intent, layer) in intents.into_iter().zip(layers) {
        grouped[layer].push(intent);
    }

    let mut calls = Vec::new();
    for (layer, mut members) in grouped.into_iter().enumerate() {
        members.sort_by_key(|intent| Reverse(intent.metadata().priority));
        while !members.is_empty() {
            let rest = members.split_off(members.len().min(max_operations_per_call));
            calls.push(CompiledCall {
                index: calls.len(),
                layer,
                intents: members,
            });
            members = rest;
        }
    }

    CallPlan {
        document_id: document_id.clone(),
        calls,
    }
}
