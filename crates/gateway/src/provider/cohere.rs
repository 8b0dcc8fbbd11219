//! Cohere v2 API driver.

mod input;
mod output;

use async_trait::async_trait;
use config::ApiProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;

use self::input::{CohereChatRequest, CohereEmbedRequest};
use self::output::{CohereChatResponse, CohereStreamEvent, CohereStreamState};
use crate::error::{GatewayError, Result};
use crate::messages::canonical::{
    ChatRequest, ChatResponse, Embedding, EmbeddingRequest, EmbeddingResponse, ProviderId, Usage,
};
use crate::provider::{
    Provider, ProviderStream, encode_body_with_extras, http_client, plain_api_error, resolve_key, send_with_retry,
};
use crate::request::RequestContext;

const DEFAULT_BASE_URL: &str = "https://api.cohere.com/v2";

pub struct CohereProvider {
    sync_client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    config: ApiProviderConfig,
}

impl CohereProvider {
    pub fn new(config: ApiProviderConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let sync_client = http_client::sync_client(headers.clone(), config.max_concurrency, config.timeout_secs);
        let stream_client = http_client::streaming_client(headers, config.timeout_secs);

        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            sync_client,
            stream_client,
            base_url,
            config,
        }
    }

    fn request_builder(
        &self,
        client: &reqwest::Client,
        url: &str,
        ctx: &RequestContext,
    ) -> Result<reqwest::RequestBuilder> {
        let key = resolve_key(ProviderId::Cohere, ctx, &self.config.api_key)?;

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

    async fn api_error(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Cohere API error ({status}): {text}");

        #[derive(serde::Deserialize)]
        struct CohereError {
            message: String,
        }

        match sonic_rs::from_str::<CohereError>(&text) {
            Ok(parsed) => GatewayError::ProviderApi {
                provider: ProviderId::Cohere,
                status,
                error_type: None,
                message: parsed.message,
                param: None,
            },
            Err(_) => plain_api_error(ProviderId::Cohere, status, text),
        }
    }
}

#[async_trait]
impl Provider for CohereProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Cohere
    }

    async fn chat(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        let url = format!("{}/chat", self.base_url);

        let model = request.model.clone();
        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let wire = CohereChatRequest::from(request);
        let body = encode_body_with_extras(ProviderId::Cohere, &wire, &extra)?;

        let builder = self.request_builder(&self.sync_client, &url, ctx)?.body(body);
        let response = send_with_retry(ProviderId::Cohere, builder).await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::transport(ProviderId::Cohere, e))?;

        let wire_response: CohereChatResponse =
            sonic_rs::from_str(&text).map_err(|e| GatewayError::decode(ProviderId::Cohere, e))?;

        let mut canonical = ChatResponse::from(wire_response);
        canonical.model = model;
        if ctx.capture_raw {
            canonical.extras.raw = serde_json::from_str(&text).ok();
        }

        Ok(canonical)
    }

    async fn chat_stream(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ProviderStream> {
        let url = format!("{}/chat", self.base_url);

        let model = request.model.clone();
        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let mut wire = CohereChatRequest::from(request);
        wire.stream = Some(true);

        let body = encode_body_with_extras(ProviderId::Cohere, &wire, &extra)?;

        let builder = self.request_builder(&self.stream_client, &url, ctx)?.body(body);
        let response = send_with_retry(ProviderId::Cohere, builder).await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let events = response.bytes_stream().eventsource();

        let chunks = futures::stream::unfold(
            (Box::pin(events), CohereStreamState::new(model)),
            |(mut events, mut state)| async move {
                loop {
                    let event = events.next().await?;

                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            log::warn!("SSE framing error in Cohere stream: {e}");
                            continue;
                        }
                    };

                    let parsed: CohereStreamEvent = match sonic_rs::from_str(&event.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            log::warn!("Failed to parse Cohere stream event: {e}");
                            continue;
                        }
                    };

                    if let Some(chunk) = state.process(parsed) {
                        return Some((Ok(chunk), (events, state)));
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }

    async fn embed(&self, request: EmbeddingRequest, ctx: &RequestContext) -> Result<EmbeddingResponse> {
        let url = format!("{}/embed", self.base_url);

        let model = request.model.clone();
        let wire = CohereEmbedRequest::from(request);
        let body = sonic_rs::to_vec(&wire).map_err(|e| GatewayError::encode(ProviderId::Cohere, e))?;

        let builder = self.request_builder(&self.sync_client, &url, ctx)?.body(body);
        let response = send_with_retry(ProviderId::Cohere, builder).await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        #[derive(serde::Deserialize)]
        struct EmbedResponse {
            id: String,
            embeddings: EmbedValues,
            #[serde(default)]
            meta: Option<EmbedMeta>,
        }

        #[derive(serde::Deserialize)]
        struct EmbedValues {
            #[serde(default)]
            float: Vec<Vec<f32>>,
        }

        #[derive(serde::Deserialize)]
        struct EmbedMeta {
            #[serde(default)]
            billed_units: Option<BilledUnits>,
        }

        #[derive(serde::Deserialize)]
        struct BilledUnits {
            #[serde(default)]
            input_tokens: u32,
        }

        let wire_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::decode(ProviderId::Cohere, e))?;

        let usage = wire_response.meta.and_then(|meta| meta.billed_units).map(|units| {
            Usage {
                prompt_tokens: units.input_tokens,
                completion_tokens: 0,
                total_tokens: 0,
                prompt_details: None,
                completion_details: None,
            }
            .fill_total()
        });

        Ok(EmbeddingResponse {
            id: wire_response.id,
            model,
            provider: ProviderId::Cohere,
            data: wire_response
                .embeddings
                .float
                .into_iter()
                .enumerate()
                .map(|(index, vector)| Embedding {
                    index: index as u32,
                    vector,
                })
                .collect(),
            usage,
        })
    }

    fn allows(&self, operation: config::Operation) -> bool {
        !self.config.disallows(operation)
    }
}
