//! Google Gemini API driver (the `vertex` provider tag).

mod input;
mod output;

use async_trait::async_trait;
use config::ApiProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;

use self::input::{BatchEmbedRequest, EmbedContentRequest, GenerateContentRequest, GoogleContent, GooglePart};
use self::output::{BatchEmbedResponse, GenerateContentResponse};
use crate::error::{GatewayError, Result};
use crate::messages::canonical::{
    ChatRequest, ChatResponse, Embedding, EmbeddingRequest, EmbeddingResponse, ProviderId,
};
use crate::provider::{
    Provider, ProviderStream, encode_body_with_extras, http_client, plain_api_error, resolve_key, send_with_retry,
};
use crate::request::RequestContext;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleProvider {
    sync_client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    config: ApiProviderConfig,
}

impl GoogleProvider {
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
        let mut builder = client.post(url);

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
        log::error!("Google API error ({status}): {text}");

        // Error shape: {"error": {"code": .., "message": .., "status": ..}}
        #[derive(serde::Deserialize)]
        struct GoogleErrorResponse {
            error: GoogleErrorBody,
        }

        #[derive(serde::Deserialize)]
        struct GoogleErrorBody {
            message: String,
            #[serde(default)]
            status: Option<String>,
        }

        match sonic_rs::from_str::<GoogleErrorResponse>(&text) {
            Ok(parsed) => GatewayError::ProviderApi {
                provider: ProviderId::Vertex,
                status,
                error_type: parsed.error.status,
                message: parsed.error.message,
                param: None,
            },
            Err(_) => plain_api_error(ProviderId::Vertex, status, text),
        }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Vertex
    }

    async fn chat(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        let key = resolve_key(ProviderId::Vertex, ctx, &self.config.api_key)?;
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            request.model,
            key.expose_secret()
        );

        let model = request.model.clone();
        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let wire = GenerateContentRequest::from(request);
        let body = encode_body_with_extras(ProviderId::Vertex, &wire, &extra)?;

        let builder = self.request_builder(&self.sync_client, &url, ctx)?.body(body);
        let response = send_with_retry(ProviderId::Vertex, builder).await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::transport(ProviderId::Vertex, e))?;

        let wire_response: GenerateContentResponse =
            sonic_rs::from_str(&text).map_err(|e| GatewayError::decode(ProviderId::Vertex, e))?;

        let mut canonical = ChatResponse::from(wire_response);
        canonical.model = model;
        if ctx.capture_raw {
            canonical.extras.raw = serde_json::from_str(&text).ok();
        }

        Ok(canonical)
    }

    async fn chat_stream(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ProviderStream> {
        let key = resolve_key(ProviderId::Vertex, ctx, &self.config.api_key)?;
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url,
            request.model,
            key.expose_secret()
        );

        let model = request.model.clone();
        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let wire = GenerateContentRequest::from(request);
        let body = encode_body_with_extras(ProviderId::Vertex, &wire, &extra)?;

        let builder = self.request_builder(&self.stream_client, &url, ctx)?.body(body);
        let response = send_with_retry(ProviderId::Vertex, builder).await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let events = response.bytes_stream().eventsource();

        let chunks = futures::stream::unfold((Box::pin(events), model, true), |(mut events, model, first)| async move {
            loop {
                let event = events.next().await?;

                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("SSE framing error in Google stream: {e}");
                        continue;
                    }
                };

                let frame: GenerateContentResponse = match sonic_rs::from_str(&event.data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("Failed to parse Google stream frame: {e}");
                        continue;
                    }
                };

                let mut chunk = output::response_to_chunk(frame, first);
                chunk.model = model.clone();

                return Some((Ok(chunk), (events, model, false)));
            }
        });

        Ok(Box::pin(chunks))
    }

    async fn embed(&self, request: EmbeddingRequest, ctx: &RequestContext) -> Result<EmbeddingResponse> {
        let key = resolve_key(ProviderId::Vertex, ctx, &self.config.api_key)?;
        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.base_url,
            request.model,
            key.expose_secret()
        );

        let model = request.model.clone();
        let wire = BatchEmbedRequest {
            requests: request
                .input
                .iter()
                .map(|text| EmbedContentRequest {
                    model: format!("models/{}", request.model),
                    content: GoogleContent {
                        role: None,
                        parts: vec![GooglePart {
                            text: Some(text.clone()),
                            ..Default::default()
                        }],
                    },
                    output_dimensionality: request.dimensions,
                })
                .collect(),
        };

        let body = sonic_rs::to_vec(&wire).map_err(|e| GatewayError::encode(ProviderId::Vertex, e))?;

        let builder = self.request_builder(&self.sync_client, &url, ctx)?.body(body);
        let response = send_with_retry(ProviderId::Vertex, builder).await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let wire_response: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::decode(ProviderId::Vertex, e))?;

        Ok(EmbeddingResponse {
            id: format!("embd-{}", uuid::Uuid::new_v4()),
            model,
            provider: ProviderId::Vertex,
            data: wire_response
                .embeddings
                .into_iter()
                .enumerate()
                .map(|(index, embedding)| Embedding {
                    index: index as u32,
                    vector: embedding.values,
                })
                .collect(),
            usage: None,
        })
    }

    fn allows(&self, operation: config::Operation) -> bool {
        !self.config.disallows(operation)
    }
}
