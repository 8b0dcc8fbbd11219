//! Ollama native API driver.
//!
//! Talks to a local daemon at `http://localhost:11434`: `/api/chat`,
//! `/api/generate`, and `/api/embed`. No authentication header; streaming is
//! newline-delimited JSON rather than SSE.

mod input;
mod output;

use async_trait::async_trait;
use config::ApiProviderConfig;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue};

use self::input::{OllamaChatRequest, OllamaEmbedRequest, OllamaGenerateRequest};
use self::output::{OllamaChatResponse, OllamaEmbedResponse, OllamaGenerateResponse};
use crate::error::{GatewayError, Result};
use crate::messages::canonical::{
    ChatRequest, ChatResponse, CompletionChoice, Embedding, EmbeddingRequest, EmbeddingResponse, ProviderId,
    TextCompletionRequest, TextCompletionResponse,
};
use crate::provider::{
    Provider, ProviderStream, encode_body_with_extras, http_client, plain_api_error, send_with_retry,
};
use crate::request::RequestContext;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    sync_client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    config: ApiProviderConfig,
}

impl OllamaProvider {
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

    fn request_builder(&self, client: &reqwest::Client, url: &str, ctx: &RequestContext) -> reqwest::RequestBuilder {
        let mut builder = client.post(url);

        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name, value);
        }

        for (name, value) in &ctx.extra_headers {
            builder = builder.header(name, value);
        }

        builder
    }

    async fn api_error(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Ollama API error ({status}): {text}");

        #[derive(serde::Deserialize)]
        struct OllamaError {
            error: String,
        }

        match sonic_rs::from_str::<OllamaError>(&text) {
            Ok(parsed) => GatewayError::ProviderApi {
                provider: ProviderId::Ollama,
                status,
                error_type: None,
                message: parsed.error,
                param: None,
            },
            Err(_) => plain_api_error(ProviderId::Ollama, status, text),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }

    async fn chat(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);

        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let wire = OllamaChatRequest::from(request);
        let body = encode_body_with_extras(ProviderId::Ollama, &wire, &extra)?;

        let builder = self.request_builder(&self.sync_client, &url, ctx).body(body);
        let response = send_with_retry(ProviderId::Ollama, builder).await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let wire_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::decode(ProviderId::Ollama, e))?;

        Ok(ChatResponse::from(wire_response))
    }

    async fn chat_stream(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ProviderStream> {
        let url = format!("{}/api/chat", self.base_url);

        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let mut wire = OllamaChatRequest::from(request);
        wire.stream = true;

        let body = encode_body_with_extras(ProviderId::Ollama, &wire, &extra)?;

        let builder = self.request_builder(&self.stream_client, &url, ctx).body(body);
        let response = send_with_retry(ProviderId::Ollama, builder).await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        // NDJSON: buffer bytes, cut on newlines, one chunk per line.
        let stream_id = format!("ollama-{}", uuid::Uuid::new_v4());
        let state = (Box::pin(response.bytes_stream()), Vec::<u8>::new(), stream_id, true);

        let chunks = futures::stream::unfold(state, |(mut bytes, mut buffer, stream_id, mut first)| async move {
            loop {
                if let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=position).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();

                    if line.is_empty() {
                        continue;
                    }

                    let parsed: OllamaChatResponse = match sonic_rs::from_str(line) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            log::warn!("Failed to parse Ollama stream line: {e}");
                            continue;
                        }
                    };

                    let chunk = output::response_to_chunk(parsed, &stream_id, first);
                    first = false;
                    return Some((Ok(chunk), (bytes, buffer, stream_id, first)));
                }

                match bytes.next().await {
                    Some(Ok(data)) => buffer.extend_from_slice(&data),
                    Some(Err(e)) => {
                        log::error!("Ollama stream transport error: {e}");
                        return Some((
                            Err(GatewayError::ProviderRequestFailed {
                                provider: ProviderId::Ollama,
                                message: e.to_string(),
                            }),
                            (bytes, buffer, stream_id, first),
                        ));
                    }
                    None => return None,
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
        let url = format!("{}/api/generate", self.base_url);
        let params = request.params.clone().unwrap_or_default();

        // /api/generate takes one prompt per call; batch inputs fan out
        // sequentially and keep their order.
        let mut choices = Vec::new();
        let mut usage_prompt = 0u32;
        let mut usage_completion = 0u32;
        let mut model = request.model.clone();

        for (index, prompt) in request.input.prompts().into_iter().enumerate() {
            let wire = OllamaGenerateRequest {
                model: request.model.clone(),
                prompt: prompt.to_string(),
                stream: false,
                options: input::options_from_params(&params),
            };

            let body = sonic_rs::to_vec(&wire).map_err(|e| GatewayError::encode(ProviderId::Ollama, e))?;

            let builder = self.request_builder(&self.sync_client, &url, ctx).body(body);
            let response = send_with_retry(ProviderId::Ollama, builder).await?;

            if !response.status().is_success() {
                return Err(Self::api_error(response).await);
            }

            let wire_response: OllamaGenerateResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::decode(ProviderId::Ollama, e))?;

            usage_prompt += wire_response.prompt_eval_count.unwrap_or(0);
            usage_completion += wire_response.eval_count.unwrap_or(0);
            model = wire_response.model;

            choices.push(CompletionChoice {
                index: index as u32,
                text: wire_response.response,
                finish_reason: output::done_reason_to_finish(wire_response.done_reason.as_deref(), false)
                    .or(wire_response.done.then_some(crate::messages::canonical::FinishReason::Stop)),
            });
        }

        Ok(TextCompletionResponse {
            id: format!("ollama-{}", uuid::Uuid::new_v4()),
            model,
            provider: ProviderId::Ollama,
            choices,
            usage: output::usage_from_counts(Some(usage_prompt), Some(usage_completion)),
            created: crate::messages::canonical::now_unix(),
        })
    }

    async fn embed(&self, request: EmbeddingRequest, ctx: &RequestContext) -> Result<EmbeddingResponse> {
        let url = format!("{}/api/embed", self.base_url);

        let model = request.model.clone();
        let wire = OllamaEmbedRequest {
            model: request.model,
            input: request.input,
            truncate: request.truncate,
        };

        let body = sonic_rs::to_vec(&wire).map_err(|e| GatewayError::encode(ProviderId::Ollama, e))?;

        let builder = self.request_builder(&self.sync_client, &url, ctx).body(body);
        let response = send_with_retry(ProviderId::Ollama, builder).await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let wire_response: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::decode(ProviderId::Ollama, e))?;

        Ok(EmbeddingResponse {
            id: format!("ollama-{}", uuid::Uuid::new_v4()),
            model,
            provider: ProviderId::Ollama,
            data: wire_response
                .embeddings
                .into_iter()
                .enumerate()
                .map(|(index, vector)| Embedding {
                    index: index as u32,
                    vector,
                })
                .collect(),
            usage: output::usage_from_counts(wire_response.prompt_eval_count, None),
        })
    }

    fn allows(&self, operation: config::Operation) -> bool {
        !self.config.disallows(operation)
    }
}
