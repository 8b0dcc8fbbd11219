//! OpenAI API driver: chat completions, legacy completions, embeddings,
//! and the realtime capability.

use std::sync::Arc;

use async_trait::async_trait;
use config::ApiProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{GatewayError, Result};
use crate::messages::canonical::{
    ChatRequest, ChatResponse, ChatStreamChunk, Embedding, EmbeddingRequest, EmbeddingResponse, ProviderId,
    TextCompletionRequest, TextCompletionResponse, Usage,
};
use crate::messages::openai as wire;
use crate::provider::{
    Provider, ProviderStream, encode_body_with_extras, http_client, plain_api_error, resolve_key, send_with_retry,
};
use crate::realtime::{RealtimeEvent, RealtimeProvider};
use crate::request::RequestContext;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    sync_client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    config: ApiProviderConfig,
    realtime: Arc<OpenAiRealtime>,
}

impl OpenAiProvider {
    pub fn new(config: ApiProviderConfig) -> Self {
        Self::with_provider_id(config, ProviderId::OpenAi, DEFAULT_BASE_URL)
    }

    /// Shared constructor for OpenAI-compatible backends (Mistral reuses
    /// this wire format against its own base URL).
    pub(crate) fn with_provider_id(config: ApiProviderConfig, id: ProviderId, default_base_url: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let sync_client = http_client::sync_client(headers.clone(), config.max_concurrency, config.timeout_secs);
        let stream_client = http_client::streaming_client(headers, config.timeout_secs);

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url.to_string());

        let realtime = Arc::new(OpenAiRealtime {
            id,
            api_key: config.api_key.clone(),
            base_url: base_url.clone(),
        });

        Self {
            sync_client,
            stream_client,
            base_url,
            config,
            realtime,
        }
    }

    pub(crate) fn provider_id(&self) -> ProviderId {
        self.realtime.id
    }

    fn request_builder(
        &self,
        client: &reqwest::Client,
        url: &str,
        ctx: &RequestContext,
    ) -> Result<reqwest::RequestBuilder> {
        let key = resolve_key(self.provider_id(), ctx, &self.config.api_key)?;

        let mut builder = client
            .post(url)
            .header(http::header::AUTHORIZATION, format!("Bearer {}", key.expose_secret()));

        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name, value);
        }

        for (name, value) in &ctx.extra_headers {
            builder = builder.header(name, value);
        }

        Ok(builder)
    }

    async fn api_error(&self, response: reqwest::Response) -> GatewayError {
        let provider = self.provider_id();
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("{provider} API error ({status}): {text}");

        match sonic_rs::from_str::<wire::ErrorResponse>(&text) {
            Ok(parsed) => GatewayError::ProviderApi {
                provider,
                status,
                error_type: parsed.error.error_type,
                message: parsed.error.message,
                param: parsed.error.param,
            },
            Err(_) => plain_api_error(provider, status, text),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        self.provider_id()
    }

    async fn chat(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        let provider = self.provider_id();
        let url = format!("{}/chat/completions", self.base_url);

        let raw_body = request.raw_body.clone();
        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let mut wire_request = wire::ChatCompletionRequest::from(request);
        wire_request.stream = None;

        let body = match raw_body {
            Some(raw) => raw,
            None => encode_body_with_extras(provider, &wire_request, &extra)?,
        };

        let builder = self.request_builder(&self.sync_client, &url, ctx)?.body(body);
        let response = send_with_retry(provider, builder).await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let text = response.text().await.map_err(|e| GatewayError::transport(provider, e))?;

        let wire_response: wire::ChatCompletionResponse =
            sonic_rs::from_str(&text).map_err(|e| GatewayError::decode(provider, e))?;

        let mut canonical = ChatResponse::from(wire_response);
        canonical.provider = provider;
        if ctx.capture_raw {
            canonical.extras.raw = serde_json::from_str(&text).ok();
        }

        Ok(canonical)
    }

    async fn chat_stream(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ProviderStream> {
        let provider = self.provider_id();
        let url = format!("{}/chat/completions", self.base_url);

        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let mut wire_request = wire::ChatCompletionRequest::from(request);
        wire_request.stream = Some(true);
        wire_request.stream_options = Some(wire::StreamOptions { include_usage: true });

        let body = encode_body_with_extras(provider, &wire_request, &extra)?;

        let builder = self.request_builder(&self.stream_client, &url, ctx)?.body(body);
        let response = send_with_retry(provider, builder).await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let events = response.bytes_stream().eventsource();

        let chunks = events.filter_map(move |event| async move {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("SSE framing error in {provider} stream: {e}");
                    return None;
                }
            };

            if event.data == "[DONE]" {
                return None;
            }

            match sonic_rs::from_str::<wire::ChatCompletionChunk>(&event.data) {
                Ok(chunk) => {
                    let mut canonical = ChatStreamChunk::from(chunk);
                    canonical.provider = provider;
                    Some(Ok(canonical))
                }
                Err(e) => {
                    log::warn!("Failed to parse {provider} stream chunk: {e}");
                    None
                }
            }
        });

        Ok(Box::pin(chunks))
    }

    async fn text_completion(
        &self,
        request: TextCompletionRequest,
        ctx: &RequestContext,
    ) -> Result<TextCompletionResponse> {
        let provider = self.provider_id();
        let url = format!("{}/completions", self.base_url);

        let wire_request = wire::CompletionRequest::from(request);
        let body = sonic_rs::to_vec(&wire_request).map_err(|e| GatewayError::encode(provider, e))?;

        let builder = self.request_builder(&self.sync_client, &url, ctx)?.body(body);
        let response = send_with_retry(provider, builder).await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let text = response.text().await.map_err(|e| GatewayError::transport(provider, e))?;

        let wire_response: wire::CompletionResponse =
            sonic_rs::from_str(&text).map_err(|e| GatewayError::decode(provider, e))?;

        let mut canonical = TextCompletionResponse::from(wire_response);
        canonical.provider = provider;

        Ok(canonical)
    }

    async fn embed(&self, request: EmbeddingRequest, ctx: &RequestContext) -> Result<EmbeddingResponse> {
        let provider = self.provider_id();
        let url = format!("{}/embeddings", self.base_url);

        let model = request.model.clone();
        let wire_request = wire::EmbeddingRequest::from(request);
        let body = sonic_rs::to_vec(&wire_request).map_err(|e| GatewayError::encode(provider, e))?;

        let builder = self.request_builder(&self.sync_client, &url, ctx)?.body(body);
        let response = send_with_retry(provider, builder).await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let text = response.text().await.map_err(|e| GatewayError::transport(provider, e))?;

        let wire_response: wire::EmbeddingResponse =
            sonic_rs::from_str(&text).map_err(|e| GatewayError::decode(provider, e))?;

        Ok(EmbeddingResponse {
            id: format!("embd-{}", uuid::Uuid::new_v4()),
            model,
            provider,
            data: wire_response
                .data
                .into_iter()
                .map(|entry| Embedding {
                    index: entry.index,
                    vector: entry.embedding,
                })
                .collect(),
            usage: wire_response.usage.map(Usage::from),
        })
    }

    fn allows(&self, operation: config::Operation) -> bool {
        !self.config.disallows(operation)
    }

    fn realtime(&self) -> Option<Arc<dyn RealtimeProvider>> {
        if self.provider_id() == ProviderId::OpenAi {
            Some(self.realtime.clone())
        } else {
            None
        }
    }
}

/// Realtime capability: one WebSocket per key+model at
/// `wss://…/v1/realtime?model=…`.
pub(crate) struct OpenAiRealtime {
    id: ProviderId,
    api_key: Option<SecretString>,
    base_url: String,
}

impl RealtimeProvider for OpenAiRealtime {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn supports_realtime(&self) -> bool {
        self.id == ProviderId::OpenAi
    }

    fn realtime_url(&self, _key: &SecretString, model: &str) -> String {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);

        format!("{ws_base}/realtime?model={model}")
    }

    fn realtime_headers(&self, key: &SecretString) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), format!("Bearer {}", key.expose_secret())),
            ("OpenAI-Beta".to_string(), "realtime=v1".to_string()),
        ]
    }

    fn to_canonical(&self, raw: &str) -> Result<RealtimeEvent> {
        crate::realtime::openai::decode_event(raw)
    }

    fn to_provider(&self, event: &RealtimeEvent) -> Result<String> {
        crate::realtime::openai::encode_event(event)
    }

    fn configured_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_url_swaps_scheme_and_appends_model() {
        let realtime = OpenAiRealtime {
            id: ProviderId::OpenAi,
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
        };

        let url = realtime.realtime_url(&SecretString::from("sk".to_string()), "gpt-realtime");
        assert_eq!(url, "wss://api.openai.com/v1/realtime?model=gpt-realtime");
    }

    #[test]
    fn realtime_headers_carry_bearer_and_beta_flag() {
        let realtime = OpenAiRealtime {
            id: ProviderId::OpenAi,
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
        };

        let headers = realtime.realtime_headers(&SecretString::from("sk-test".to_string()));
        assert_eq!(headers[0].1, "Bearer sk-test");
        assert_eq!(headers[1], ("OpenAI-Beta".to_string(), "realtime=v1".to_string()));
    }
}
