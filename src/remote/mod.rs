//! # Remote Document Service
//!
//! The narrow contract this layer needs from the spreadsheet backend: a batched write of ordered
//! sub-operations and a values read. Both the raw client and the
//! [`ResilienceStack`](crate::resilience::ResilienceStack) decorator implement
//! [`DocumentService`], so callers never know which one they hold.

pub mod errors;
pub mod memory;
pub mod types;

pub use errors::RemoteError;
pub use memory::{InMemoryDocumentService, ScriptedFault};
pub use types::{
    BatchUpdateRequest, BatchUpdateResponse, Endpoint, ReadRequest, RequestContext, SubOperation,
    SubOperationReply, ValueRange,
};

use crate::error::GuardResult;
use async_trait::async_trait;

#[async_trait]
pub trait DocumentService: Send + Sync + std::fmt::Debug {
    /// Apply an ordered list of sub-operations in one remote call
    async fn batch_update(
        &self,
        request: &BatchUpdateRequest,
        ctx: &RequestContext,
    ) -> GuardResult<BatchUpdateResponse>;

    /// Read the values of a region
    async fn read_values(&self, request: &ReadRequest, ctx: &RequestContext)
        -> GuardResult<ValueRange>;

    fn service_name(&self) -> &'static str;
}
