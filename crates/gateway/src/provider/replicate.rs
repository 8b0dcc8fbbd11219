//! Replicate predictions driver.
//!
//! Replicate runs arbitrary models behind a prediction queue; this driver
//! uses blocking mode (`Prefer: wait`) against
//! `POST /v1/models/{owner}/{name}/predictions` for chat and text
//! completion. Event streaming and tool calling are not part of the
//! predictions surface.

use async_trait::async_trait;
use config::ApiProviderConfig;
use http::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::messages::canonical::{
    ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatRole, CompletionChoice, FinishReason, MessageContent,
    ProviderId, TextCompletionRequest, TextCompletionResponse, Usage,
};
use crate::provider::{Provider, ProviderStream, http_client, plain_api_error, resolve_key, send_with_retry};
use crate::request::RequestContext;

const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

pub struct ReplicateProvider {
    sync_client: reqwest::Client,
    base_url: String,
    config: ApiProviderConfig,
}

#[derive(Debug, Serialize)]
struct PredictionRequest {
    input: PredictionInput,
}

#[derive(Debug, Serialize)]
struct PredictionInput {
    prompt: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    id: String,

    #[serde(default)]
    status: String,

    #[serde(default)]
    output: Option<PredictionOutput>,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    metrics: Option<PredictionMetrics>,
}

/// Language models emit token lists; older models emit one string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictionOutput {
    Text(String),
    Pieces(Vec<String>),
}

impl PredictionOutput {
    fn join(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Pieces(pieces) => pieces.concat(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PredictionMetrics {
    #[serde(default)]
    input_token_count: Option<u32>,

    #[serde(default)]
    output_token_count: Option<u32>,
}

impl ReplicateProvider {
    pub fn new(config: ApiProviderConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static("wait"));

        let sync_client = http_client::sync_client(headers, config.max_concurrency, config.timeout_secs);

        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            sync_client,
            base_url,
            config,
        }
    }

    async fn predict(&self, model: &str, input: PredictionInput, ctx: &RequestContext) -> Result<PredictionResponse> {
        let key = resolve_key(ProviderId::Replicate, ctx, &self.config.api_key)?;
        let url = format!("{}/models/{}/predictions", self.base_url, model);

        let wire = PredictionRequest { input };
        let body = sonic_rs::to_vec(&wire).map_err(|e| GatewayError::encode(ProviderId::Replicate, e))?;

        let mut builder = self
            .sync_client
            .post(&url)
            .header(http::header::AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            .body(body);

        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name, value);
        }

        for (name, value) in &ctx.extra_headers {
            builder = builder.header(name, value);
        }

        let response = send_with_retry(ProviderId::Replicate, builder).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Replicate API error ({status}): {text}");
            return Err(plain_api_error(ProviderId::Replicate, status, text));
        }

        let prediction: PredictionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::decode(ProviderId::Replicate, e))?;

        if let Some(error) = prediction.error {
            return Err(GatewayError::ProviderApi {
                provider: ProviderId::Replicate,
                status: 502,
                error_type: Some(prediction.status),
                message: error,
                param: None,
            });
        }

        Ok(prediction)
    }

    fn usage(metrics: Option<PredictionMetrics>) -> Option<Usage> {
        metrics.map(|metrics| {
            Usage {
                prompt_tokens: metrics.input_token_count.unwrap_or(0),
                completion_tokens: metrics.output_token_count.unwrap_or(0),
                total_tokens: 0,
                prompt_details: None,
                completion_details: None,
            }
            .fill_total()
        })
    }
}

/// Render a conversation as a plain prompt; Replicate predictions take a
/// single text input.
fn conversation_to_prompt(messages: &[ChatMessage]) -> (Option<String>, String) {
    let mut system = Vec::new();
    let mut turns = Vec::new();

    for message in messages {
        let Some(text) = message.text_content() else {
            continue;
        };

        match message.role {
            ChatRole::System | ChatRole::Developer => system.push(text),
            ChatRole::Assistant => turns.push(format!("Assistant: {text}")),
            _ => turns.push(format!("User: {text}")),
        }
    }

    let system = if system.is_empty() { None } else { Some(system.join("\n\n")) };

    (system, turns.join("\n"))
}

#[async_trait]
impl Provider for ReplicateProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Replicate
    }

    async fn chat(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        let params = request.params.clone().unwrap_or_default();
        let (system_prompt, prompt) = conversation_to_prompt(&request.messages);

        let prediction = self
            .predict(
                &request.model,
                PredictionInput {
                    prompt,
                    system_prompt,
                    max_tokens: params.max_tokens,
                    temperature: params.temperature,
                    top_p: params.top_p,
                    top_k: params.top_k,
                },
                ctx,
            )
            .await?;

        let text = prediction.output.map(PredictionOutput::join).unwrap_or_default();

        Ok(ChatResponse {
            id: prediction.id,
            model: request.model,
            provider: ProviderId::Replicate,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content: Some(MessageContent::Text(text)),
                    tool_calls: None,
                    thought: None,
                    tool_call_id: None,
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Self::usage(prediction.metrics),
            created: crate::messages::canonical::now_unix(),
            extras: Default::default(),
        })
    }

    async fn chat_stream(&self, request: ChatRequest, _ctx: &RequestContext) -> Result<ProviderStream> {
        let _ = request;
        Err(GatewayError::UnsupportedOperation {
            provider: ProviderId::Replicate,
            operation: "chat_stream",
        })
    }

    async fn text_completion(
        &self,
        request: TextCompletionRequest,
        ctx: &RequestContext,
    ) -> Result<TextCompletionResponse> {
        let params = request.params.clone().unwrap_or_default();

        let mut choices = Vec::new();
        let mut usage_total: Option<Usage> = None;
        let mut id = String::new();

        for (index, prompt) in request.input.prompts().into_iter().enumerate() {
            let prediction = self
                .predict(
                    &request.model,
                    PredictionInput {
                        prompt: prompt.to_string(),
                        system_prompt: None,
                        max_tokens: params.max_tokens,
                        temperature: params.temperature,
                        top_p: params.top_p,
                        top_k: params.top_k,
                    },
                    ctx,
                )
                .await?;

            if id.is_empty() {
                id = prediction.id.clone();
            }

            if let Some(usage) = Self::usage(prediction.metrics) {
                let aggregate = usage_total.get_or_insert_with(Usage::default);
                aggregate.prompt_tokens += usage.prompt_tokens;
                aggregate.completion_tokens += usage.completion_tokens;
                aggregate.total_tokens += usage.total_tokens;
            }

            choices.push(CompletionChoice {
                index: index as u32,
                text: prediction.output.map(PredictionOutput::join).unwrap_or_default(),
                finish_reason: Some(FinishReason::Stop),
            });
        }

        Ok(TextCompletionResponse {
            id,
            model: request.model,
            provider: ProviderId::Replicate,
            choices,
            usage: usage_total,
            created: crate::messages::canonical::now_unix(),
        })
    }

    fn allows(&self, operation: config::Operation) -> bool {
        !self.config.disallows(operation)
    }
}
