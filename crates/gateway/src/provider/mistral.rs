//! Mistral driver.
//!
//! Mistral's chat, streaming, and embeddings endpoints speak the
//! OpenAI-compatible wire format, so this driver delegates to the shared
//! OpenAI machinery with its own base URL and provider tag. Legacy text
//! completions are not offered upstream.

use async_trait::async_trait;
use config::ApiProviderConfig;

use crate::error::{GatewayError, Result};
use crate::messages::canonical::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ProviderId, TextCompletionRequest,
    TextCompletionResponse,
};
use crate::provider::{Provider, ProviderStream, openai::OpenAiProvider};
use crate::request::RequestContext;

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";

pub struct MistralProvider {
    inner: OpenAiProvider,
}

impl MistralProvider {
    pub fn new(config: ApiProviderConfig) -> Self {
        Self {
            inner: OpenAiProvider::with_provider_id(config, ProviderId::Mistral, DEFAULT_BASE_URL),
        }
    }
}

#[async_trait]
impl Provider for MistralProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Mistral
    }

    async fn chat(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        self.inner.chat(request, ctx).await
    }

    async fn chat_stream(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ProviderStream> {
        self.inner.chat_stream(request, ctx).await
    }

    async fn text_completion(
        &self,
        _request: TextCompletionRequest,
        _ctx: &RequestContext,
    ) -> Result<TextCompletionResponse> {
        Err(GatewayError::UnsupportedOperation {
            provider: ProviderId::Mistral,
            operation: "text_completion",
        })
    }

    async fn embed(&self, request: EmbeddingRequest, ctx: &RequestContext) -> Result<EmbeddingResponse> {
        self.inner.embed(request, ctx).await
    }

    fn allows(&self, operation: config::Operation) -> bool {
        self.inner.allows(operation)
    }
}
