//! Anthropic Messages API driver.

use async_trait::async_trait;
use config::ApiProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;

use crate::error::{GatewayError, Result};
use crate::messages::anthropic::{
    ContentDelta, MessagesRequest, MessagesResponse, StreamEvent,
};
use crate::messages::canonical::{
    ChatRequest, ChatResponse, ChatRole, ChatStreamChunk, FinishReason, FunctionDelta, FunctionStart, MessageDelta,
    ProviderId, StreamChoice, ToolCallDelta, Usage,
};
use crate::provider::{
    Provider, ProviderStream, encode_body_with_extras, http_client, plain_api_error, resolve_key, send_with_retry,
};
use crate::request::RequestContext;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    sync_client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    config: ApiProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ApiProviderConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
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
        let key = resolve_key(ProviderId::Anthropic, ctx, &self.config.api_key)?;

        let mut builder = client.post(url).header("x-api-key", key.expose_secret());

        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name, value);
        }

        // Caller headers merge last.
        for (name, value) in &ctx.extra_headers {
            builder = builder.header(name, value);
        }

        Ok(builder)
    }
}

async fn api_error(response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    log::error!("Anthropic API error ({status}): {text}");

    match sonic_rs::from_str::<crate::messages::anthropic::ErrorResponse>(&text) {
        Ok(parsed) => GatewayError::ProviderApi {
            provider: ProviderId::Anthropic,
            status,
            error_type: Some(parsed.error.error_type),
            message: parsed.error.message,
            param: None,
        },
        Err(_) => plain_api_error(ProviderId::Anthropic, status, text),
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn chat(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.base_url);

        let raw_body = request.raw_body.clone();
        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let wire = MessagesRequest::from(request);
        let body = match raw_body {
            Some(raw) => raw,
            None => encode_body_with_extras(ProviderId::Anthropic, &wire, &extra)?,
        };

        let builder = self.request_builder(&self.sync_client, &url, ctx)?.body(body);
        let response = send_with_retry(ProviderId::Anthropic, builder).await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::transport(ProviderId::Anthropic, e))?;

        let wire_response: MessagesResponse =
            sonic_rs::from_str(&text).map_err(|e| GatewayError::decode(ProviderId::Anthropic, e))?;

        let mut canonical = ChatResponse::from(wire_response);
        if ctx.capture_raw {
            canonical.extras.raw = serde_json::from_str(&text).ok();
        }

        Ok(canonical)
    }

    async fn chat_stream(&self, request: ChatRequest, ctx: &RequestContext) -> Result<ProviderStream> {
        let url = format!("{}/messages", self.base_url);

        let extra = request.params.as_ref().map(|p| p.extra.clone()).unwrap_or_default();
        let mut wire = MessagesRequest::from(request);
        wire.stream = Some(true);

        let body = encode_body_with_extras(ProviderId::Anthropic, &wire, &extra)?;

        let builder = self.request_builder(&self.stream_client, &url, ctx)?.body(body);
        let response = send_with_retry(ProviderId::Anthropic, builder).await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let events = response.bytes_stream().eventsource();

        // One state machine per stream; when the upstream body ends without
        // a terminal event the state synthesizes one.
        let chunks = futures::stream::unfold(
            (Box::pin(events), MessageStreamState::new(), false),
            |(mut events, mut state, done)| async move {
                if done {
                    return None;
                }

                loop {
                    let Some(event) = events.next().await else {
                        // Upstream closed; emit the synthetic terminal chunk if
                        // the stream never finished properly.
                        return state
                            .finish()
                            .map(|chunk| (Ok(chunk), (events, state, true)));
                    };

                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            log::warn!("SSE framing error in Anthropic stream: {e}");
                            continue;
                        }
                    };

                    let parsed: StreamEvent = match sonic_rs::from_str(&event.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            // Recoverable: skip this event, keep the stream.
                            log::warn!("Failed to parse Anthropic stream event: {e}");
                            continue;
                        }
                    };

                    match state.process(parsed) {
                        Some(Ok(chunk)) => return Some((Ok(chunk), (events, state, false))),
                        Some(Err(error)) => return Some((Err(error), (events, state, true))),
                        None => continue,
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }

    fn allows(&self, operation: config::Operation) -> bool {
        !self.config.disallows(operation)
    }
}

/// State machine turning Anthropic stream events into canonical chunks.
pub(crate) struct MessageStreamState {
    id: String,
    model: String,
    usage: Option<Usage>,
    last_stop_reason: Option<String>,
    /// Anthropic content block index → canonical tool-call index.
    tool_blocks: std::collections::HashMap<u32, usize>,
    next_tool_index: usize,
    finished: bool,
}

impl MessageStreamState {
    pub(crate) fn new() -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            usage: None,
            last_stop_reason: None,
            tool_blocks: std::collections::HashMap::new(),
            next_tool_index: 0,
            finished: false,
        }
    }

    fn chunk(&self, delta: MessageDelta, finish_reason: Option<FinishReason>) -> ChatStreamChunk {
        ChatStreamChunk {
            id: self.id.clone(),
            model: self.model.clone(),
            provider: ProviderId::Anthropic,
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
            chunk_index: 0,
        }
    }

    fn merge_usage(&mut self, incoming: crate::messages::anthropic::Usage) {
        let mut merged = Usage::from(incoming);
        if merged.prompt_tokens == 0
            && let Some(previous) = &self.usage
        {
            merged.prompt_tokens = previous.prompt_tokens;
        }
        self.usage = Some(merged.fill_total());
    }

    /// Process one event. `Some(Ok)` emits a chunk, `Some(Err)` is terminal,
    /// `None` is book-keeping only.
    pub(crate) fn process(&mut self, event: StreamEvent) -> Option<Result<ChatStreamChunk>> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                self.merge_usage(message.usage);

                Some(Ok(self.chunk(
                    MessageDelta {
                        role: Some(ChatRole::Assistant),
                        ..Default::default()
                    },
                    None,
                )))
            }

            StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                crate::messages::anthropic::Content::ToolUse { id, name, .. } => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_blocks.insert(index, tool_index);

                    Some(Ok(self.chunk(
                        MessageDelta {
                            tool_calls: Some(vec![ToolCallDelta::Start {
                                index: tool_index,
                                id,
                                function: FunctionStart {
                                    name,
                                    arguments: String::new(),
                                },
                            }]),
                            ..Default::default()
                        },
                        None,
                    )))
                }
                crate::messages::anthropic::Content::Text { .. } => Some(Ok(self.chunk(
                    MessageDelta {
                        content: Some(String::new()),
                        ..Default::default()
                    },
                    None,
                ))),
                _ => None,
            },

            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => Some(Ok(self.chunk(
                    MessageDelta {
                        content: Some(text),
                        ..Default::default()
                    },
                    None,
                ))),
                ContentDelta::InputJsonDelta { partial_json } => {
                    let Some(tool_index) = self.tool_blocks.get(&index).copied() else {
                        log::warn!("input_json_delta for unknown block index {index}");
                        return None;
                    };

                    Some(Ok(self.chunk(
                        MessageDelta {
                            tool_calls: Some(vec![ToolCallDelta::Delta {
                                index: tool_index,
                                function: FunctionDelta {
                                    arguments: partial_json,
                                },
                            }]),
                            ..Default::default()
                        },
                        None,
                    )))
                }
                ContentDelta::ThinkingDelta { thinking } => Some(Ok(self.chunk(
                    MessageDelta {
                        thought: Some(thinking),
                        ..Default::default()
                    },
                    None,
                ))),
                ContentDelta::SignatureDelta { .. } => None,
            },

            StreamEvent::ContentBlockStop { .. } => None,

            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.merge_usage(usage);
                }

                let Some(stop_reason) = delta.stop_reason else {
                    return None;
                };

                self.finished = true;
                self.last_stop_reason = Some(stop_reason.clone());

                let mut chunk = self.chunk(MessageDelta::default(), Some(FinishReason::from_anthropic(&stop_reason)));
                chunk.usage = self.usage.clone();
                Some(Ok(chunk))
            }

            // The terminal accounting already went out with the stop reason;
            // nothing left to emit.
            StreamEvent::MessageStop => {
                self.finished = true;
                None
            }

            StreamEvent::Ping => None,

            StreamEvent::Error { error } => {
                self.finished = true;
                Some(Err(GatewayError::StreamTerminal {
                    provider: ProviderId::Anthropic,
                    error_type: Some(error.error_type),
                    message: error.message,
                }))
            }

            StreamEvent::Unknown(value) => {
                log::debug!("Ignoring unknown Anthropic stream event: {value}");
                None
            }
        }
    }

    /// Synthetic terminal chunk for a stream that ended without
    /// `message_stop`: carries the latest usage and the finish reason
    /// inferred from the last `message_delta`, if any.
    pub(crate) fn finish(&mut self) -> Option<ChatStreamChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let finish_reason = self
            .last_stop_reason
            .as_deref()
            .map(FinishReason::from_anthropic);

        let mut chunk = self.chunk(MessageDelta::default(), finish_reason);
        chunk.usage = self.usage.clone();
        Some(chunk)
    }
}
