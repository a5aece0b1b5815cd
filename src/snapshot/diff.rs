//! Cell-level diffs between two reads of a region, plus the projected and reported variants
//! used when no snapshot exists.

use crate::models::{CellChange, DiffSource, Intent, IntentKind, Region, RegionDiff, Span};
use crate::remote::ValueRange;
use serde_json::Value;
use std::collections::BTreeMap;

/// Non-null cells of a read, keyed by absolute (row, column)
fn cells(range: &ValueRange) -> BTreeMap<(u32, u32), &Value> {
    let row_origin = range.region.rows().start;
    let column_origin = range.region.columns().start;
    let mut cells = BTreeMap::new();
    for (r, row) in range.values.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if value.is_null() {
                continue;
            }
            let (Ok(r), Ok(c)) = (u32::try_from(r), u32::try_from(c)) else {
                continue;
            };
            cells.insert(
                (row_origin.saturating_add(r), column_origin.saturating_add(c)),
                value,
            );
        }
    }
    cells
}

/// Compare `before` and `after` within `region`. Counts are exact; at most `max_samples`
/// individual changes are kept, in row-major order.
pub fn diff_region(
    region: &Region,
    before: &ValueRange,
    after: &ValueRange,
    max_samples: usize,
    source: DiffSource,
) -> RegionDiff {
    let before_cells = cells(before);
    let after_cells = cells(after);

    let mut positions: Vec<(u32, u32)> = before_cells
        .keys()
        .chain(after_cells.keys())
        .copied()
        .filter(|(row, column)| region.contains_cell(*row, *column))
        .collect();
    positions.sort_unstable();
    positions.dedup();

    let mut diff = RegionDiff {
        region: region.clone(),
        added: 0,
        removed: 0,
        changed: 0,
        sampled: false,
        samples: Vec::new(),
        source,
    };

    for (row, column) in positions {
        let old = before_cells.get(&(row, column)).copied();
        let new = after_cells.get(&(row, column)).copied();
        match (old, new) {
            (None, Some(_)) => diff.added += 1,
            (Some(_), None) => diff.removed += 1,
            (Some(a), Some(b)) if a != b => diff.changed += 1,
            _ => continue,
        }

        if diff.samples.len() < max_samples {
            diff.samples.push(CellChange {
                cell: region.cell_label(row, column),
                before: old.cloned().unwrap_or(Value::Null),
                after: new.cloned().unwrap_or(Value::Null),
            });
        } else {
            diff.sampled = true;
        }
    }

    diff
}

/// Diff built from the remote service's own report when nothing was captured
pub fn effect_report_diff(region: &Region, cells_affected: Option<u64>) -> RegionDiff {
    RegionDiff {
        region: region.clone(),
        added: 0,
        removed: 0,
        changed: cells_affected.unwrap_or(0),
        sampled: false,
        samples: Vec::new(),
        source: DiffSource::EffectReport,
    }
}

/// What a value intent would leave behind in `current`, or `None` for kinds whose effect
/// cannot be projected from values alone
pub fn project_intent(current: &ValueRange, intent: &Intent) -> Option<ValueRange> {
    match intent.kind() {
        IntentKind::ClearValues => Some(ValueRange {
            region: current.region.clone(),
            values: Vec::new(),
            revision: current.revision.clone(),
        }),
        IntentKind::WriteValues => {
            let written = intent.payload().get("values")?.as_array()?;
            let mut cells: BTreeMap<(u32, u32), Value> = cells(current)
                .into_iter()
                .map(|(position, value)| (position, value.clone()))
                .collect();

            let target = intent.region();
            for (r, row) in written.iter().enumerate() {
                for (c, value) in row.as_array()?.iter().enumerate() {
                    let (Ok(r), Ok(c)) = (u32::try_from(r), u32::try_from(c)) else {
                        continue;
                    };
                    let position = (
                        target.rows().start.saturating_add(r),
                        target.columns().start.saturating_add(c),
                    );
                    if value.is_null() {
                        cells.remove(&position);
                    } else {
                        cells.insert(position, value.clone());
                    }
                }
            }

            Some(dense(target, cells, current.revision.clone()))
        }
        _ => None,
    }
}

/// Effects already projected for earlier intents of a dry run. Later intents read their
/// region through the overlay, so overlapping intents project in plan order.
#[derive(Debug, Default)]
pub struct ProjectionOverlay {
    layers: Vec<(Region, BTreeMap<(u32, u32), Value>)>,
}

impl ProjectionOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// `current` within `region` as it would stand after every recorded layer
    pub fn apply(&self, region: &Region, current: &ValueRange) -> ValueRange {
        if !self.layers.iter().any(|(layer, _)| layer.overlaps(region)) {
            return current.clone();
        }

        let mut state: BTreeMap<(u32, u32), Value> = cells(current)
            .into_iter()
            .filter(|((row, column), _)| region.contains_cell(*row, *column))
            .map(|(position, value)| (position, value.clone()))
            .collect();
        for (layer, layer_cells) in &self.layers {
            if !layer.overlaps(region) {
                continue;
            }
            state.retain(|(row, column), _| !layer.contains_cell(*row, *column));
            state.extend(
                layer_cells
                    .iter()
                    .filter(|((row, column), _)| region.contains_cell(*row, *column))
                    .map(|(position, value)| (*position, value.clone())),
            );
        }
        dense(region, state, current.revision.clone())
    }

    /// Record that `region` would hold `after` once the intent is applied
    pub fn record(&mut self, region: &Region, after: &ValueRange) {
        let layer = cells(after)
            .into_iter()
            .filter(|((row, column), _)| region.contains_cell(*row, *column))
            .map(|(position, value)| (position, value.clone()))
            .collect();
        self.layers.push((region.clone(), layer));
    }
}

/// Row-major matrix anchored at the top-left of the occupied cells' bounding box within `region`
fn dense(
    region: &Region,
    cells: BTreeMap<(u32, u32), Value>,
    revision: Option<String>,
) -> ValueRange {
    let row_origin = cells.keys().map(|(r, _)| *r).min().unwrap_or(region.rows().start);
    let column_origin = cells
        .keys()
        .map(|(_, c)| *c)
        .min()
        .unwrap_or(region.columns().start);

    let mut values: Vec<Vec<Value>> = Vec::new();
    for ((row, column), value) in cells {
        let r = (row - row_origin) as usize;
        let c = (column - column_origin) as usize;
        if values.len() <= r {
            values.resize_with(r + 1, Vec::new);
        }
        if values[r].len() <= c {
            values[r].resize(c + 1, Value::Null);
        }
        values[r][c] = value;
    }

    ValueRange {
        region: Region::new(
            region.sheet(),
            Span::new(row_origin, None),
            Span::new(column_origin, None),
        ),
        values,
        revision,
    }
}
