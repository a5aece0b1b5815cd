//! # In-Memory Document Service
//!
//! A complete [`DocumentService`] backed by process memory. Used for development, dry testing
//! and the test-suite: faults can be scripted per endpoint, latency can be injected, and every
//! upstream call is counted and recorded.

use super::errors::RemoteError;
use super::types::{
    BatchUpdateRequest, BatchUpdateResponse, Endpoint, ReadRequest, RequestContext, SubOperation,
    SubOperationReply, ValueRange,
};
use super::DocumentService;
use crate::error::GuardResult;
use crate::models::{DocumentId, IntentKind, Region};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// A failure injected into the next call of an endpoint
#[derive(Debug, Clone)]
pub enum ScriptedFault {
    /// The whole call fails with this remote error
    Remote(RemoteError),
    /// The call succeeds but the sub-operation at `index` is rejected
    SubOperation { index: usize, message: String },
    /// Serve the call normally, so a later queued fault hits a later call
    Pass,
}

impl ScriptedFault {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Remote(RemoteError::from_status(status, message, None))
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::Remote(RemoteError::RateLimited {
            message: "quota exceeded".to_string(),
            retry_after,
        })
    }
}

#[derive(Debug, Default)]
struct SheetData {
    cells: BTreeMap<(u32, u32), Value>,
}

impl SheetData {
    fn extent(&self) -> (u32, u32) {
        self.cells.keys().fold((0, 0), |(rows, columns), (r, c)| {
            (rows.max(r + 1), columns.max(c + 1))
        })
    }
}

#[derive(Debug, Default)]
struct DocumentState {
    sheets: BTreeMap<String, SheetData>,
    revision: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentService {
    documents: Mutex<HashMap<DocumentId, DocumentState>>,
    faults: Mutex<HashMap<Endpoint, VecDeque<ScriptedFault>>>,
    latency: Option<Duration>,
    batch_update_calls: AtomicU64,
    read_values_calls: AtomicU64,
    batches: Mutex<Vec<BatchUpdateRequest>>,
    reads: Mutex<Vec<ReadRequest>>,
}

impl InMemoryDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it is served
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a fault for the next call of `endpoint`
    pub fn push_fault(&self, endpoint: Endpoint, fault: ScriptedFault) {
        self.faults
            .lock()
            .entry(endpoint)
            .or_default()
            .push_back(fault);
    }

    /// Queue the same fault for the next `times` calls of `endpoint`
    pub fn fail_next(&self, endpoint: Endpoint, times: usize, fault: ScriptedFault) {
        let mut faults = self.faults.lock();
        let queue = faults.entry(endpoint).or_default();
        for _ in 0..times {
            queue.push_back(fault.clone());
        }
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Write values directly, bypassing counters and faults
    pub fn seed_values(&self, document_id: &DocumentId, region: &Region, values: Vec<Vec<Value>>) {
        let mut documents = self.documents.lock();
        let document = documents.entry(document_id.clone()).or_default();
        let sheet = document.sheets.entry(region.sheet().to_string()).or_default();
        write_matrix(sheet, region, &values);
        document.revision += 1;
    }

    /// Read values directly, bypassing counters and faults
    pub fn peek_values(&self, document_id: &DocumentId, region: &Region) -> ValueRange {
        let documents = self.documents.lock();
        read_range(documents.get(document_id), region)
    }

    pub fn sheet_names(&self, document_id: &DocumentId) -> Vec<String> {
        self.documents
            .lock()
            .get(document_id)
            .map(|d| d.sheets.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn batch_update_calls(&self) -> u64 {
        self.batch_update_calls.load(Ordering::Relaxed)
    }

    pub fn read_values_calls(&self) -> u64 {
        self.read_values_calls.load(Ordering::Relaxed)
    }

    pub fn recorded_batches(&self) -> Vec<BatchUpdateRequest> {
        self.batches.lock().clone()
    }

    pub fn recorded_reads(&self) -> Vec<ReadRequest> {
        self.reads.lock().clone()
    }

    fn next_fault(&self, endpoint: Endpoint) -> Option<ScriptedFault> {
        self.faults.lock().get_mut(&endpoint)?.pop_front()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl DocumentService for InMemoryDocumentService {
    async fn batch_update(
        &self,
        request: &BatchUpdateRequest,
        ctx: &RequestContext,
    ) -> GuardResult<BatchUpdateResponse> {
        self.batch_update_calls.fetch_add(1, Ordering::Relaxed);
        self.batches.lock().push(request.clone());
        self.simulate_latency().await;

        let rejected_index = match self.next_fault(Endpoint::BatchUpdate) {
            Some(ScriptedFault::Remote(error)) => {
                debug!(request_id = %ctx.request_id, error = %error, "Scripted batch_update failure");
                return Err(error.into_guard(Endpoint::BatchUpdate));
            }
            Some(ScriptedFault::SubOperation { index, message }) => Some((index, message)),
            Some(ScriptedFault::Pass) | None => None,
        };

        let mut documents = self.documents.lock();
        let document = documents.entry(request.document_id.clone()).or_default();
        let mut replies = Vec::with_capacity(request.operations.len());
        let mut failed = false;
        let mut applied = 0usize;

        for (index, operation) in request.operations.iter().enumerate() {
            if failed {
                replies.push(SubOperationReply::failed(
                    "not applied: an earlier sub-operation failed",
                ));
                continue;
            }

            let reply = match &rejected_index {
                Some((rejected, message)) if *rejected == index => {
                    SubOperationReply::failed(message.clone())
                }
                _ => apply_operation(document, operation),
            };

            if reply.success {
                applied += 1;
            } else {
                failed = true;
            }
            replies.push(reply);
        }

        if applied > 0 {
            document.revision += 1;
        }

        Ok(BatchUpdateResponse {
            replies,
            revision: Some(document.revision.to_string()),
        })
    }

    async fn read_values(
        &self,
        request: &ReadRequest,
        ctx: &RequestContext,
    ) -> GuardResult<ValueRange> {
        self.read_values_calls.fetch_add(1, Ordering::Relaxed);
        self.reads.lock().push(request.clone());
        self.simulate_latency().await;

        if let Some(ScriptedFault::Remote(error)) = self.next_fault(Endpoint::ReadValues) {
            debug!(request_id = %ctx.request_id, error = %error, "Scripted read_values failure");
            return Err(error.into_guard(Endpoint::ReadValues));
        }

        let documents = self.documents.lock();
        Ok(read_range(documents.get(&request.document_id), &request.region))
    }

    fn service_name(&self) -> &'static str {
        "in_memory"
    }
}

fn read_range(document: Option<&DocumentState>, region: &Region) -> ValueRange {
    let revision = document.map(|d| d.revision.to_string());
    let Some(sheet) = document.and_then(|d| d.sheets.get(region.sheet())) else {
        return ValueRange {
            region: region.clone(),
            values: Vec::new(),
            revision,
        };
    };

    let (row_extent, column_extent) = sheet.extent();
    let clipped = region.clip(row_extent, column_extent);
    let region = if clipped.rows().is_empty() || clipped.columns().is_empty() {
        region.clone()
    } else {
        clipped
    };

    let mut values: Vec<Vec<Value>> = Vec::new();
    for ((row, column), value) in &sheet.cells {
        if !region.contains_cell(*row, *column) {
            continue;
        }
        let r = (row - region.rows().start) as usize;
        let c = (column - region.columns().start) as usize;
        if values.len() <= r {
            values.resize_with(r + 1, Vec::new);
        }
        if values[r].len() <= c {
            values[r].resize(c + 1, Value::Null);
        }
        values[r][c] = value.clone();
    }

    ValueRange {
        region,
        values,
        revision,
    }
}

fn write_matrix(sheet: &mut SheetData, region: &Region, values: &[Vec<Value>]) -> u64 {
    let mut written = 0;
    for (r, row) in values.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            let (Ok(r), Ok(c)) = (u32::try_from(r), u32::try_from(c)) else {
                continue;
            };
            let target = (region.rows().start + r, region.columns().start + c);
            if value.is_null() {
                sheet.cells.remove(&target);
            } else {
                sheet.cells.insert(target, value.clone());
            }
            written += 1;
        }
    }
    written
}

fn apply_operation(document: &mut DocumentState, operation: &SubOperation) -> SubOperationReply {
    let region = &operation.region;
    match &operation.kind {
        IntentKind::WriteValues => {
            let Some(values) = parse_matrix(&operation.payload) else {
                return SubOperationReply::failed("payload must contain a 'values' matrix");
            };
            let rows = values.len() as u64;
            let columns = values.iter().map(Vec::len).max().unwrap_or(0) as u64;
            if region.rows().len().is_some_and(|len| rows > len)
                || region.columns().len().is_some_and(|len| columns > len)
            {
                return SubOperationReply::failed(format!(
                    "{rows}x{columns} values exceed target region {region}"
                ));
            }
            let sheet = document.sheets.entry(region.sheet().to_string()).or_default();
            SubOperationReply::applied(Some(write_matrix(sheet, region, &values)))
        }
        IntentKind::ClearValues => {
            let Some(sheet) = document.sheets.get_mut(region.sheet()) else {
                return SubOperationReply::applied(Some(0));
            };
            let before = sheet.cells.len();
            sheet
                .cells
                .retain(|(row, column), _| !region.contains_cell(*row, *column));
            SubOperationReply::applied(Some((before - sheet.cells.len()) as u64))
        }
        IntentKind::InsertDimension | IntentKind::DeleteDimension => {
            let by_rows = match operation.payload.get("dimension").and_then(Value::as_str) {
                Some("ROWS") => true,
                Some("COLUMNS") => false,
                _ => {
                    return SubOperationReply::failed(
                        "payload must name a dimension of ROWS or COLUMNS",
                    )
                }
            };
            let span = if by_rows { region.rows() } else { region.columns() };
            let Some(count) = span.len().and_then(|len| u32::try_from(len).ok()) else {
                return SubOperationReply::failed("dimension range must be bounded");
            };
            let sheet = document.sheets.entry(region.sheet().to_string()).or_default();
            let insert = matches!(operation.kind, IntentKind::InsertDimension);
            let moved = shift_cells(sheet, by_rows, span.start, count, insert);
            SubOperationReply::applied(Some(moved))
        }
        IntentKind::AddSheet => {
            if document.sheets.contains_key(region.sheet()) {
                return SubOperationReply::failed(format!(
                    "sheet '{}' already exists",
                    region.sheet()
                ));
            }
            document
                .sheets
                .insert(region.sheet().to_string(), SheetData::default());
            SubOperationReply::applied(Some(0))
        }
        IntentKind::DeleteSheet => match document.sheets.remove(region.sheet()) {
            Some(sheet) => SubOperationReply::applied(Some(sheet.cells.len() as u64)),
            None => SubOperationReply::failed(format!("sheet '{}' does not exist", region.sheet())),
        },
        IntentKind::FormatCells
        | IntentKind::MergeCells
        | IntentKind::SortRange
        | IntentKind::CreateChart
        | IntentKind::Custom { .. } => SubOperationReply::applied(region.cell_count()),
    }
}

fn parse_matrix(payload: &Value) -> Option<Vec<Vec<Value>>> {
    payload
        .get("values")?
        .as_array()?
        .iter()
        .map(|row| row.as_array().cloned())
        .collect()
}

/// Shift cells along one axis; returns the number of cells removed or moved
fn shift_cells(sheet: &mut SheetData, by_rows: bool, start: u32, count: u32, insert: bool) -> u64 {
    let end = start.saturating_add(count);
    let mut touched = 0;
    let cells = std::mem::take(&mut sheet.cells);
    for ((row, column), value) in cells {
        let index = if by_rows { row } else { column };
        let new_index = if insert {
            if index >= start {
                touched += 1;
                Some(index.saturating_add(count))
            } else {
                Some(index)
            }
        } else if index < start {
            Some(index)
        } else if index < end {
            touched += 1;
            None
        } else {
            touched += 1;
            Some(index - count)
        };

        if let Some(new_index) = new_index {
            let key = if by_rows {
                (new_index, column)
            } else {
                (row, new_index)
            };
            sheet.cells.insert(key, value);
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntentId;
    use serde_json::json;

    fn op(kind: IntentKind, region: &str, payload: Value) -> SubOperation {
        SubOperation {
            intent_id: IntentId::new(),
            kind,
            region: Region::parse(region).unwrap(),
            payload,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let service = InMemoryDocumentService::new();
        let doc = DocumentId::from("doc");
        let request = BatchUpdateRequest {
            document_id: doc.clone(),
            operations: vec![op(
                IntentKind::WriteValues,
                "Sheet1!A1:B2",
                json!({"values": [[1, 2], [3, 4]]}),
            )],
        };

        let response = service.batch_update(&request, &ctx()).await.unwrap();
        assert!(response.all_succeeded());
        assert_eq!(response.replies[0].cells_affected, Some(4));

        let read = service
            .read_values(
                &ReadRequest::new(doc, Region::parse("Sheet1!A1:B2").unwrap()),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(read.values, vec![vec![json!(1), json!(2)], vec![json!(3), json!(4)]]);
        assert_eq!(service.batch_update_calls(), 1);
        assert_eq!(service.read_values_calls(), 1);
    }

    #[tokio::test]
    async fn failing_sub_operation_stops_the_rest() {
        let service = InMemoryDocumentService::new();
        service.push_fault(
            Endpoint::BatchUpdate,
            ScriptedFault::SubOperation {
                index: 1,
                message: "invalid range".into(),
            },
        );
        let request = BatchUpdateRequest {
            document_id: DocumentId::from("doc"),
            operations: vec![
                op(IntentKind::WriteValues, "S!A1", json!({"values": [[1]]})),
                op(IntentKind::WriteValues, "S!B1", json!({"values": [[2]]})),
                op(IntentKind::WriteValues, "S!C1", json!({"values": [[3]]})),
            ],
        };

        let response = service.batch_update(&request, &ctx()).await.unwrap();
        let successes: Vec<bool> = response.replies.iter().map(|r| r.success).collect();
        assert_eq!(successes, vec![true, false, false]);

        let values = service.peek_values(&DocumentId::from("doc"), &Region::parse("S!A1:C1").unwrap());
        assert_eq!(values.values, vec![vec![json!(1)]]);
    }

    #[tokio::test]
    async fn scripted_remote_errors_are_classified() {
        let service = InMemoryDocumentService::new();
        service.push_fault(Endpoint::ReadValues, ScriptedFault::status(503, "unavailable"));

        let request = ReadRequest::new(DocumentId::from("doc"), Region::parse("S!A1").unwrap());
        let error = service.read_values(&request, &ctx()).await.unwrap_err();
        assert_eq!(error.code(), "TRANSIENT_REMOTE_ERROR");

        assert!(service.read_values(&request, &ctx()).await.is_ok());
    }

    #[test]
    fn unbounded_reads_clip_to_data_extent() {
        let service = InMemoryDocumentService::new();
        let doc = DocumentId::from("doc");
        service.seed_values(
            &doc,
            &Region::parse("S!B2:C3").unwrap(),
            vec![vec![json!("a"), json!("b")], vec![json!("c"), json!("d")]],
        );

        let range = service.peek_values(&doc, &Region::parse("S!B:C").unwrap());
        assert_eq!(range.region.to_string(), "S!B1:C3");
        assert_eq!(range.values[0], Vec::<Value>::new());
        assert_eq!(range.values[1], vec![json!("a"), json!("b")]);
    }

    #[test]
    fn delete_rows_shifts_following_cells_up() {
        let mut sheet = SheetData::default();
        sheet.cells.insert((0, 0), json!("keep"));
        sheet.cells.insert((1, 0), json!("drop"));
        sheet.cells.insert((2, 0), json!("move"));

        let touched = shift_cells(&mut sheet, true, 1, 1, false);
        assert_eq!(touched, 2);
        assert_eq!(sheet.cells.get(&(0, 0)), Some(&json!("keep")));
        assert_eq!(sheet.cells.get(&(1, 0)), Some(&json!("move")));
        assert_eq!(sheet.cells.len(), 2);
    }
}
