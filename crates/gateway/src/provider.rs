//! The provider driver: dispatch, retries, streaming pumps, post-hooks.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};
use crate::hooks::{NoopHook, PostHook};
use crate::messages::canonical::{
    ChatRequest, ChatResponse, ChatStreamChunk, EmbeddingRequest, EmbeddingResponse, ProviderId,
    TextCompletionRequest, TextCompletionResponse,
    responses_api::{ResponsesRequest, ResponsesResponse},
};
use crate::realtime::{RealtimeProvider, RealtimeSession};
use crate::request::RequestContext;

pub(crate) mod http_client;

mod anthropic;
mod bedrock;
mod cohere;
mod google;
mod mistral;
mod ollama;
mod openai;
mod replicate;

pub use anthropic::AnthropicProvider;
pub use bedrock::BedrockProvider;
pub use cohere::CohereProvider;
pub use google::GoogleProvider;
pub use mistral::MistralProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use replicate::ReplicateProvider;

/// Raw chunk stream produced by a provider, before the driver's pump
/// assigns chunk indices and applies hooks.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ChatStreamChunk>> + Send>>;

/// Buffered capacity of the canonical chunk channel. A consumer that stops
/// draining blocks the parser after this many chunks instead of buffering
/// without bound.
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// One upstream backend.
///
/// Implementations are immutable after construction; all per-call state is
/// parameterized in through the request and context.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn chat(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ChatResponse>;

    async fn chat_stream(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ProviderStream>;

    async fn text_completion(
        &self,
        _request: TextCompletionRequest,
        _ctx: &RequestContext,
    ) -> Result<TextCompletionResponse> {
        Err(GatewayError::UnsupportedOperation {
            provider: self.id(),
            operation: "text_completion",
        })
    }

    async fn embed(&self, _request: EmbeddingRequest, _ctx: &RequestContext) -> Result<EmbeddingResponse> {
        Err(GatewayError::UnsupportedOperation {
            provider: self.id(),
            operation: "embeddings",
        })
    }

    /// Whether the configuration permits the operation. Providers with a
    /// disallow-list override this.
    fn allows(&self, _operation: config::Operation) -> bool {
        true
    }

    /// Realtime capability, when the provider has one.
    fn realtime(&self) -> Option<Arc<dyn RealtimeProvider>> {
        None
    }
}

/// Errors constructing a [`Gateway`].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("provider {0} requires an API provider configuration")]
    ExpectedApiConfig(ProviderId),

    #[error("provider {0} requires a Bedrock configuration")]
    ExpectedBedrockConfig(ProviderId),

    #[error("failed to initialize provider {provider}: {message}")]
    Init { provider: ProviderId, message: String },
}

/// The gateway driver: a registry of providers plus the shared post-hook.
///
/// Effectively immutable after construction; entry points are safe to call
/// concurrently.
pub struct Gateway {
    providers: HashMap<ProviderId, Arc<dyn Provider>>,
    hook: Arc<dyn PostHook>,
    realtime_sessions: tokio::sync::Mutex<HashMap<RealtimeKey, Arc<RealtimeSession>>>,
}

type RealtimeKey = (ProviderId, String, String);

pub struct GatewayBuilder {
    configs: Vec<(ProviderId, config::ProviderConfig)>,
    hook: Arc<dyn PostHook>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder {
            configs: Vec::new(),
            hook: Arc::new(NoopHook),
        }
    }

    fn provider(&self, id: ProviderId, operation: &'static str) -> Result<&Arc<dyn Provider>> {
        self.providers.get(&id).ok_or(GatewayError::OperationDisallowed {
            provider: id,
            operation,
        })
    }

    fn check_allowed(provider: &Arc<dyn Provider>, operation: config::Operation, name: &'static str) -> Result<()> {
        if provider.allows(operation) {
            Ok(())
        } else {
            Err(GatewayError::OperationDisallowed {
                provider: provider.id(),
                operation: name,
            })
        }
    }

    /// Synchronous chat completion.
    pub async fn chat(&self, mut request: ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        let outcome = async {
            if ctx.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let provider = self.provider(request.provider, "chat")?;
            Self::check_allowed(provider, config::Operation::Chat, "chat")?;

            request.params = request
                .params
                .take()
                .map(|params| params.validate_and_filter_for(request.provider));

            let response = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => return Err(GatewayError::Cancelled),
                result = provider.chat(request, ctx) => result?,
            };

            Ok(finalize_response(response))
        }
        .await;

        self.hook.on_response(ctx, outcome).await
    }

    /// Streaming chat completion.
    ///
    /// Spawns exactly one pump task per stream. The pump assigns contiguous
    /// chunk indices from 0, runs the post-hook on every chunk (flagging the
    /// terminal one), and closes the channel exactly once: on upstream end,
    /// on a terminal error, or on cancellation.
    pub async fn chat_stream(&self, mut request: ChatRequest, ctx: &RequestContext) -> Result<ChatStream> {
        if ctx.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let provider = self.provider(request.provider, "chat_stream")?;
        Self::check_allowed(provider, config::Operation::ChatStream, "chat_stream")?;

        request.params = request
            .params
            .take()
            .map(|params| params.validate_and_filter_for(request.provider));

        let upstream = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => return Err(GatewayError::Cancelled),
            result = provider.chat_stream(request, ctx) => result?,
        };

        Ok(spawn_stream_pump(upstream, ctx.clone(), self.hook.clone()))
    }

    /// Text completion.
    pub async fn text_completion(
        &self,
        mut request: TextCompletionRequest,
        ctx: &RequestContext,
    ) -> Result<TextCompletionResponse> {
        let outcome = async {
            if ctx.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let provider = self.provider(request.provider, "text_completion")?;
            Self::check_allowed(provider, config::Operation::TextCompletion, "text_completion")?;

            request.params = request
                .params
                .take()
                .map(|params| params.validate_and_filter_for(request.provider));

            tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => Err(GatewayError::Cancelled),
                result = provider.text_completion(request, ctx) => result,
            }
        }
        .await;

        self.hook.on_text_completion(ctx, outcome).await
    }

    /// Embeddings.
    pub async fn embed(&self, request: EmbeddingRequest, ctx: &RequestContext) -> Result<EmbeddingResponse> {
        let outcome = async {
            if ctx.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let provider = self.provider(request.provider, "embeddings")?;
            Self::check_allowed(provider, config::Operation::Embeddings, "embeddings")?;

            tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => Err(GatewayError::Cancelled),
                result = provider.embed(request, ctx) => result,
            }
        }
        .await;

        self.hook.on_embedding(ctx, outcome).await
    }

    /// Responses-surface request, served by lowering onto chat.
    pub async fn responses(&self, request: ResponsesRequest, ctx: &RequestContext) -> Result<ResponsesResponse> {
        let chat_response = self.chat(request.into_chat(), ctx).await?;
        Ok(ResponsesResponse::from_chat(chat_response))
    }

    /// Open (or reuse) the realtime session for this provider, key, and
    /// model. One WebSocket exists per key+model pair.
    pub async fn open_realtime(
        &self,
        id: ProviderId,
        model: &str,
        ctx: &RequestContext,
    ) -> Result<Arc<RealtimeSession>> {
        let provider = self.provider(id, "realtime")?;
        Self::check_allowed(provider, config::Operation::Realtime, "realtime")?;

        let Some(realtime) = provider.realtime() else {
            return Err(GatewayError::UnsupportedOperation {
                provider: id,
                operation: "realtime",
            });
        };

        let key_fingerprint = ctx
            .api_key
            .as_ref()
            .map(|key| key.expose_secret().to_string())
            .unwrap_or_default();
        let session_key = (id, model.to_string(), key_fingerprint);

        let mut sessions = self.realtime_sessions.lock().await;

        if let Some(session) = sessions.get(&session_key) {
            if !session.is_closed() {
                return Ok(session.clone());
            }
            sessions.remove(&session_key);
        }

        let session = Arc::new(RealtimeSession::connect(realtime, model, ctx).await?);
        sessions.insert(session_key, session.clone());

        Ok(session)
    }
}

fn finalize_response(mut response: ChatResponse) -> ChatResponse {
    if let Some(usage) = response.usage.take() {
        response.usage = Some(usage.fill_total());
    }
    response
}

impl GatewayBuilder {
    pub fn with_provider(mut self, id: ProviderId, config: config::ProviderConfig) -> Self {
        self.configs.push((id, config));
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Construct the gateway. Async because Bedrock loads its AWS
    /// configuration chain.
    pub async fn build(self) -> std::result::Result<Gateway, BuildError> {
        let mut providers: HashMap<ProviderId, Arc<dyn Provider>> = HashMap::new();

        for (id, provider_config) in self.configs {
            let provider: Arc<dyn Provider> = match (id, provider_config) {
                (ProviderId::Bedrock, config::ProviderConfig::Bedrock(config)) => {
                    Arc::new(BedrockProvider::new(config).await.map_err(|e| BuildError::Init {
                        provider: id,
                        message: e.to_string(),
                    })?)
                }
                (ProviderId::Bedrock, _) => return Err(BuildError::ExpectedBedrockConfig(id)),
                (_, config::ProviderConfig::Bedrock(_)) => return Err(BuildError::ExpectedApiConfig(id)),
                (ProviderId::Anthropic, config::ProviderConfig::Api(config)) => {
                    Arc::new(AnthropicProvider::new(config))
                }
                (ProviderId::OpenAi, config::ProviderConfig::Api(config)) => Arc::new(OpenAiProvider::new(config)),
                (ProviderId::Vertex, config::ProviderConfig::Api(config)) => Arc::new(GoogleProvider::new(config)),
                (ProviderId::Cohere, config::ProviderConfig::Api(config)) => Arc::new(CohereProvider::new(config)),
                (ProviderId::Mistral, config::ProviderConfig::Api(config)) => Arc::new(MistralProvider::new(config)),
                (ProviderId::Ollama, config::ProviderConfig::Api(config)) => Arc::new(OllamaProvider::new(config)),
                (ProviderId::Replicate, config::ProviderConfig::Api(config)) => {
                    Arc::new(ReplicateProvider::new(config))
                }
            };

            providers.insert(id, provider);
        }

        Ok(Gateway {
            providers,
            hook: self.hook,
            realtime_sessions: tokio::sync::Mutex::new(HashMap::new()),
        })
    }
}

/// Canonical chunk channel handed to the caller.
///
/// Wraps the bounded receiver; also implements [`futures::Stream`].
#[derive(Debug)]
pub struct ChatStream {
    rx: mpsc::Receiver<Result<ChatStreamChunk>>,
}

impl ChatStream {
    /// Receive the next chunk. `None` means the channel is closed.
    pub async fn recv(&mut self) -> Option<Result<ChatStreamChunk>> {
        self.rx.recv().await
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatStreamChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn spawn_stream_pump(mut upstream: ProviderStream, ctx: RequestContext, hook: Arc<dyn PostHook>) -> ChatStream {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut next_index: u64 = 0;

        loop {
            let item = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => break,
                item = upstream.next() => item,
            };

            let Some(item) = item else {
                break;
            };

            let (item, terminal) = match item {
                Ok(mut chunk) => {
                    chunk.chunk_index = next_index;
                    let terminal = chunk.finish_reason().is_some();
                    (Ok(chunk), terminal)
                }
                Err(error) => (Err(error), true),
            };

            let Some(item) = hook.on_chunk(&ctx, item, terminal).await else {
                // Suppressed: the index stays unused so emitted chunks remain
                // contiguous.
                continue;
            };

            if item.is_ok() {
                next_index += 1;
            }

            if tx.send(item).await.is_err() {
                break;
            }

            if terminal {
                break;
            }
        }
        // Dropping the sender closes the channel exactly once.
    });

    ChatStream { rx }
}

/// Send with at most one immediate retry, and only for network-level
/// failures where no response byte has arrived. HTTP-level errors are never
/// retried here.
pub(crate) async fn send_with_retry(
    provider: ProviderId,
    builder: reqwest::RequestBuilder,
) -> Result<reqwest::Response> {
    let retry_builder = builder.try_clone();

    match builder.send().await {
        Ok(response) => Ok(response),
        Err(first) => {
            let retryable = first.is_connect() || first.is_timeout();

            match (retryable, retry_builder) {
                (true, Some(retry)) => {
                    log::debug!("Retrying {provider} request after transport failure: {first}");
                    retry.send().await.map_err(|e| GatewayError::transport(provider, e))
                }
                _ => Err(GatewayError::transport(provider, first)),
            }
        }
    }
}

/// Resolve the API key for a call: per-call context first, provider
/// configuration second.
pub(crate) fn resolve_key<'a>(
    provider: ProviderId,
    ctx: &'a RequestContext,
    configured: &'a Option<SecretString>,
) -> Result<&'a SecretString> {
    ctx.api_key
        .as_ref()
        .or(configured.as_ref())
        .ok_or_else(|| GatewayError::ProviderApi {
            provider,
            status: 401,
            error_type: Some("authentication_error".to_string()),
            message: "no API key supplied for provider".to_string(),
            param: None,
        })
}

/// Encode a wire request, merging the caller's `extra` bag last. Typed
/// fields always win over conflicting extras.
pub(crate) fn encode_body_with_extras<T: serde::Serialize>(
    provider: ProviderId,
    wire: &T,
    extra: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<u8>> {
    if extra.is_empty() {
        return sonic_rs::to_vec(wire).map_err(|e| GatewayError::encode(provider, e));
    }

    let mut value = serde_json::to_value(wire).map_err(|e| GatewayError::encode(provider, e))?;
    crate::messages::canonical::merge_extras(&mut value, extra);

    sonic_rs::to_vec(&value).map_err(|e| GatewayError::encode(provider, e))
}

/// Map a non-2xx status plus raw body into the canonical API error when the
/// provider has no structured error shape of its own.
pub(crate) fn plain_api_error(provider: ProviderId, status: u16, body: String) -> GatewayError {
    GatewayError::ProviderApi {
        provider,
        status,
        error_type: None,
        message: body,
        param: None,
    }
}
