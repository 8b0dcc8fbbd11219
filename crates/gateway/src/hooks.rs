//! Post-call interception.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::messages::canonical::{ChatResponse, ChatStreamChunk, EmbeddingResponse, TextCompletionResponse};
use crate::request::RequestContext;

/// Hook invoked after every response, every error, and every streaming
/// chunk. Implementations may rewrite either side of the outcome or, for
/// chunks, suppress the item entirely by returning `None`.
///
/// Hooks run on the driver's call path and on stream pump tasks
/// concurrently, so implementations must be `Send + Sync` and must not
/// block.
#[async_trait]
pub trait PostHook: Send + Sync {
    /// Called once per synchronous operation, with the final outcome.
    async fn on_response(
        &self,
        _ctx: &RequestContext,
        outcome: Result<ChatResponse, GatewayError>,
    ) -> Result<ChatResponse, GatewayError> {
        outcome
    }

    /// Called once per streaming chunk and once for a terminal stream error.
    ///
    /// `last` is set on the final item of the stream so implementations can
    /// do end-of-stream bookkeeping. Returning `None` suppresses the item;
    /// the stream continues.
    async fn on_chunk(
        &self,
        _ctx: &RequestContext,
        chunk: Result<ChatStreamChunk, GatewayError>,
        _last: bool,
    ) -> Option<Result<ChatStreamChunk, GatewayError>> {
        Some(chunk)
    }

    /// Called once per text-completion operation.
    async fn on_text_completion(
        &self,
        _ctx: &RequestContext,
        outcome: Result<TextCompletionResponse, GatewayError>,
    ) -> Result<TextCompletionResponse, GatewayError> {
        outcome
    }

    /// Called once per embedding operation.
    async fn on_embedding(
        &self,
        _ctx: &RequestContext,
        outcome: Result<EmbeddingResponse, GatewayError>,
    ) -> Result<EmbeddingResponse, GatewayError> {
        outcome
    }
}

/// Default hook: passes everything through untouched.
pub struct NoopHook;

#[async_trait]
impl PostHook for NoopHook {}
