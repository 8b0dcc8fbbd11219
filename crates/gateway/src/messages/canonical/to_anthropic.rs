//! Conversions from canonical types to Anthropic wire types.
//!
//! Serves the outbound driver (encoding requests for `api.anthropic.com`)
//! and the dialect-out path (re-encoding canonical results for a client that
//! spoke Anthropic-native to the gateway), including SSE resynthesis.

use std::collections::HashMap;

use crate::media;
use crate::messages::{
    anthropic,
    canonical::{
        ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatStreamChunk, ContentBlock, MessageContent, ToolCall,
        ToolChoice, ToolChoiceMode, ToolDefinition, Usage,
    },
};

/// Anthropic requires `max_tokens`; used when the canonical request does not
/// set one.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

impl From<ChatRequest> for anthropic::MessagesRequest {
    fn from(request: ChatRequest) -> Self {
        let params = request.params.unwrap_or_default();

        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<anthropic::Message> = Vec::new();

        for message in request.messages {
            match message.role {
                ChatRole::System | ChatRole::Developer => {
                    if let Some(text) = message.text_content() {
                        system_parts.push(text);
                    }
                }
                ChatRole::Tool => {
                    messages.push(tool_message_to_user_turn(message));
                }
                _ => {
                    messages.push(anthropic::Message::from(message));
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        Self {
            model: request.model,
            messages,
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            stop_sequences: params.stop_sequences,
            stream: None,
            metadata: params.user.map(|user_id| anthropic::Metadata {
                user_id: Some(user_id),
            }),
            tools: params
                .tools
                .map(|tools| tools.into_iter().map(anthropic::Tool::from).collect()),
            tool_choice: params.tool_choice.map(anthropic::ToolChoice::from),
        }
    }
}

impl From<ChatMessage> for anthropic::Message {
    fn from(message: ChatMessage) -> Self {
        let role = match message.role {
            ChatRole::Assistant => anthropic::Role::Assistant,
            _ => anthropic::Role::User,
        };

        let mut blocks: Vec<anthropic::Content> = Vec::new();

        // Thinking must come before other assistant content.
        if let Some(thinking) = message.thought {
            blocks.push(anthropic::Content::Thinking {
                thinking,
                signature: None,
            });
        }

        match message.content {
            Some(MessageContent::Text(text)) => {
                if !text.is_empty() {
                    blocks.push(anthropic::Content::Text { text });
                }
            }
            Some(MessageContent::Blocks(content_blocks)) => {
                blocks.extend(content_blocks.into_iter().filter_map(content_block_to_anthropic));
            }
            None => {}
        }

        if let Some(tool_calls) = message.tool_calls {
            for call in tool_calls {
                blocks.push(tool_call_to_block(call));
            }
        }

        Self {
            role,
            content: anthropic::MessageBody::Blocks(blocks),
        }
    }
}

/// A canonical tool message becomes a `tool_result` block on a user turn.
fn tool_message_to_user_turn(message: ChatMessage) -> anthropic::Message {
    let tool_use_id = message.tool_call_id.unwrap_or_default();

    let content = match message.content {
        Some(MessageContent::Text(text)) => anthropic::ToolResultBody::Text(text),
        Some(MessageContent::Blocks(blocks)) => anthropic::ToolResultBody::Blocks(
            blocks.into_iter().filter_map(content_block_to_anthropic).collect(),
        ),
        None => anthropic::ToolResultBody::Text(String::new()),
    };

    anthropic::Message {
        role: anthropic::Role::User,
        content: anthropic::MessageBody::Blocks(vec![anthropic::Content::ToolResult {
            tool_use_id,
            content,
            is_error: None,
        }]),
    }
}

fn content_block_to_anthropic(block: ContentBlock) -> Option<anthropic::Content> {
    match block {
        ContentBlock::Text { text } => Some(anthropic::Content::Text { text }),
        ContentBlock::Image { url } => Some(anthropic::Content::Image {
            source: image_url_to_source(&url),
        }),
        // The Messages API has no audio-in block.
        ContentBlock::InputAudio { .. } => {
            log::debug!("Dropping input_audio block for Anthropic request");
            None
        }
        ContentBlock::Refusal { refusal } => Some(anthropic::Content::Text { text: refusal }),
    }
}

pub(crate) fn image_url_to_source(raw: &str) -> anthropic::ImageSource {
    let sanitized = media::sanitize_image_url(raw);

    match media::extract_url_type_info(&sanitized) {
        media::UrlTypeInfo::Base64 { media_type, data } => anthropic::ImageSource::Base64 {
            media_type: media_type.unwrap_or_else(|| "image/jpeg".to_string()),
            data,
        },
        media::UrlTypeInfo::Remote => anthropic::ImageSource::Url { url: sanitized },
    }
}

fn tool_call_to_block(call: ToolCall) -> anthropic::Content {
    anthropic::Content::ToolUse {
        input: call.function.parsed_arguments(),
        id: call.id,
        name: call.function.name,
    }
}

impl From<ToolDefinition> for anthropic::Tool {
    fn from(tool: ToolDefinition) -> Self {
        Self {
            name: tool.function.name,
            description: tool.function.description,
            input_schema: tool.function.parameters,
        }
    }
}

impl From<ToolChoice> for anthropic::ToolChoice {
    fn from(choice: ToolChoice) -> Self {
        match choice {
            ToolChoice::Mode(ToolChoiceMode::Auto) => anthropic::ToolChoice::Auto,
            ToolChoice::Mode(ToolChoiceMode::Required) => anthropic::ToolChoice::Any,
            ToolChoice::Mode(ToolChoiceMode::None) => anthropic::ToolChoice::None,
            ToolChoice::Function { name } => anthropic::ToolChoice::Tool { name },
        }
    }
}

impl From<&Usage> for anthropic::Usage {
    fn from(usage: &Usage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: usage.prompt_details.as_ref().and_then(|d| d.cached_tokens),
        }
    }
}

impl From<ChatResponse> for anthropic::MessagesResponse {
    fn from(response: ChatResponse) -> Self {
        let usage = response
            .usage
            .as_ref()
            .map(anthropic::Usage::from)
            .unwrap_or_default();

        let stop_reason = response
            .choices
            .first()
            .and_then(|choice| choice.finish_reason.as_ref())
            .map(|reason| reason.as_anthropic().to_string());

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|choice| response_message_to_blocks(choice.message))
            .unwrap_or_default();

        Self {
            id: response.id,
            r#type: "message".to_string(),
            role: anthropic::Role::Assistant,
            content,
            model: response.model,
            stop_reason,
            stop_sequence: response.extras.stop_sequence,
            usage,
        }
    }
}

fn response_message_to_blocks(message: ChatMessage) -> Vec<anthropic::Content> {
    let mut blocks = Vec::new();

    if let Some(thinking) = message.thought {
        blocks.push(anthropic::Content::Thinking {
            thinking,
            signature: None,
        });
    }

    match message.content {
        Some(MessageContent::Text(text)) if !text.is_empty() => {
            blocks.push(anthropic::Content::Text { text });
        }
        Some(MessageContent::Blocks(content_blocks)) => {
            blocks.extend(content_blocks.into_iter().filter_map(content_block_to_anthropic));
        }
        _ => {}
    }

    if let Some(tool_calls) = message.tool_calls {
        for call in tool_calls {
            blocks.push(tool_call_to_block(call));
        }
    }

    blocks
}

/// Re-synthesizes an Anthropic SSE stream from canonical chunks.
///
/// Inverse of the streaming state machine in the Anthropic provider: text
/// and thinking deltas become `content_block_delta` events, a tool-call head
/// opens a `tool_use` block, argument fragments become `input_json_delta`,
/// and the terminal finish reason becomes `message_delta` followed by
/// `message_stop`.
pub struct SseEncoder {
    started: bool,
    /// Canonical tool-call index → Anthropic content block index.
    tool_blocks: HashMap<usize, u32>,
    text_block: Option<u32>,
    next_block: u32,
    last_usage: Option<Usage>,
}

impl SseEncoder {
    pub fn new() -> Self {
        Self {
            started: false,
            tool_blocks: HashMap::new(),
            text_block: None,
            next_block: 0,
            last_usage: None,
        }
    }

    /// Events to emit for one canonical chunk, in order.
    pub fn encode(&mut self, chunk: &ChatStreamChunk) -> Vec<anthropic::StreamEvent> {
        let mut events = Vec::new();

        if let Some(usage) = &chunk.usage {
            self.last_usage = Some(usage.clone());
        }

        if !self.started {
            self.started = true;
            events.push(anthropic::StreamEvent::MessageStart {
                message: anthropic::StreamMessageStart {
                    id: chunk.id.clone(),
                    role: anthropic::Role::Assistant,
                    model: chunk.model.clone(),
                    content: Vec::new(),
                    usage: chunk.usage.as_ref().map(anthropic::Usage::from).unwrap_or_default(),
                    stop_reason: None,
                    stop_sequence: None,
                },
            });
        }

        for choice in &chunk.choices {
            if let Some(thinking) = &choice.delta.thought {
                let index = self.text_block_index(&mut events);
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index,
                    delta: anthropic::ContentDelta::ThinkingDelta {
                        thinking: thinking.clone(),
                    },
                });
            }

            if let Some(content) = &choice.delta.content {
                let index = self.text_block_index(&mut events);
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index,
                    delta: anthropic::ContentDelta::TextDelta { text: content.clone() },
                });
            }

            for tool_call in choice.delta.tool_calls.iter().flatten() {
                match tool_call {
                    super::ToolCallDelta::Start { index, id, function } => {
                        let block = self.next_block;
                        self.next_block += 1;
                        self.tool_blocks.insert(*index, block);

                        events.push(anthropic::StreamEvent::ContentBlockStart {
                            index: block,
                            content_block: anthropic::Content::ToolUse {
                                id: id.clone(),
                                name: function.name.clone(),
                                input: serde_json::Value::Object(serde_json::Map::new()),
                            },
                        });

                        if !function.arguments.is_empty() {
                            events.push(anthropic::StreamEvent::ContentBlockDelta {
                                index: block,
                                delta: anthropic::ContentDelta::InputJsonDelta {
                                    partial_json: function.arguments.clone(),
                                },
                            });
                        }
                    }
                    super::ToolCallDelta::Delta { index, function } => {
                        let Some(block) = self.tool_blocks.get(index).copied() else {
                            log::warn!("Argument delta for unknown tool call index {index}");
                            continue;
                        };
                        events.push(anthropic::StreamEvent::ContentBlockDelta {
                            index: block,
                            delta: anthropic::ContentDelta::InputJsonDelta {
                                partial_json: function.arguments.clone(),
                            },
                        });
                    }
                }
            }

            if let Some(reason) = &choice.finish_reason {
                for block in 0..self.next_block {
                    events.push(anthropic::StreamEvent::ContentBlockStop { index: block });
                }

                events.push(anthropic::StreamEvent::MessageDelta {
                    delta: anthropic::MessageDeltaBody {
                        stop_reason: Some(reason.as_anthropic().to_string()),
                        stop_sequence: None,
                    },
                    usage: self.last_usage.as_ref().map(anthropic::Usage::from),
                });
                events.push(anthropic::StreamEvent::MessageStop);
            }
        }

        events
    }

    fn text_block_index(&mut self, events: &mut Vec<anthropic::StreamEvent>) -> u32 {
        if let Some(index) = self.text_block {
            return index;
        }

        let index = self.next_block;
        self.next_block += 1;
        self.text_block = Some(index);

        events.push(anthropic::StreamEvent::ContentBlockStart {
            index,
            content_block: anthropic::Content::Text { text: String::new() },
        });

        index
    }
}

impl Default for SseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Render one stream event as SSE wire text.
pub fn event_to_sse(event: &anthropic::StreamEvent) -> String {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        log::error!("Failed to serialize Anthropic stream event: {e}");
        r#"{"type":"error","error":{"type":"internal_error","message":"serialization failed"}}"#.to_string()
    });

    format!("event: {}\ndata: {}\n\n", event.event_name(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::canonical::{
        ChatParameters, FinishReason, FunctionCall, FunctionStart, MessageDelta, ProviderId, StreamChoice,
        ToolCallDelta,
    };
    use insta::assert_json_snapshot;
    use serde_json::json;

    fn chunk(index: u64, delta: MessageDelta, finish: Option<FinishReason>) -> ChatStreamChunk {
        ChatStreamChunk {
            id: "msg_1".into(),
            model: "claude-3-5-haiku-latest".into(),
            provider: ProviderId::Anthropic,
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage: None,
            chunk_index: index,
        }
    }

    #[test]
    fn system_messages_extract_into_system_field() {
        let request = ChatRequest {
            provider: ProviderId::Anthropic,
            model: "claude-3-5-haiku-latest".into(),
            messages: vec![
                ChatMessage::text(ChatRole::System, "Be terse."),
                ChatMessage::text(ChatRole::User, "hello"),
            ],
            params: None,
            fallbacks: None,
            raw_body: None,
        };

        let wire = anthropic::MessagesRequest::from(request);

        assert_eq!(wire.system.as_deref(), Some("Be terse."));
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_message_becomes_tool_result_on_user_turn() {
        let mut message = ChatMessage::text(ChatRole::Tool, "72F and sunny");
        message.tool_call_id = Some("toolu_1".into());

        let request = ChatRequest {
            provider: ProviderId::Anthropic,
            model: "claude-3-5-haiku-latest".into(),
            messages: vec![message],
            params: None,
            fallbacks: None,
            raw_body: None,
        };

        let wire = anthropic::MessagesRequest::from(request);
        let value = serde_json::to_value(&wire.messages).unwrap();

        assert_eq!(
            value,
            json!([{
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": "toolu_1",
                    "content": "72F and sunny"
                }]
            }])
        );
    }

    #[test]
    fn assistant_tool_calls_render_as_tool_use_blocks() {
        let message = ChatMessage {
            role: ChatRole::Assistant,
            content: Some(MessageContent::Text("Checking.".into())),
            tool_calls: Some(vec![ToolCall {
                id: "toolu_1".into(),
                kind: Default::default(),
                function: FunctionCall {
                    name: "get_weather".into(),
                    arguments: r#"{"location":"San Francisco"}"#.into(),
                },
            }]),
            thought: None,
            tool_call_id: None,
        };

        let wire = anthropic::Message::from(message);

        assert_json_snapshot!(wire, @r#"
        {
          "role": "assistant",
          "content": [
            {
              "type": "text",
              "text": "Checking."
            },
            {
              "type": "tool_use",
              "id": "toolu_1",
              "name": "get_weather",
              "input": {
                "location": "San Francisco"
              }
            }
          ]
        }
        "#);
    }

    #[test]
    fn thought_renders_before_content() {
        let message = ChatMessage {
            role: ChatRole::Assistant,
            content: Some(MessageContent::Text("Hello".into())),
            tool_calls: None,
            thought: Some("keep it short".into()),
            tool_call_id: None,
        };

        let wire = anthropic::Message::from(message);
        let anthropic::MessageBody::Blocks(blocks) = &wire.content else {
            unreachable!("expected blocks");
        };

        assert!(matches!(&blocks[0], anthropic::Content::Thinking { thinking, .. } if thinking == "keep it short"));
        assert!(matches!(&blocks[1], anthropic::Content::Text { text } if text == "Hello"));
    }

    #[test]
    fn tool_choice_none_maps_to_none() {
        let request = ChatRequest {
            provider: ProviderId::Anthropic,
            model: "claude-3-5-haiku-latest".into(),
            messages: vec![ChatMessage::text(ChatRole::User, "hi")],
            params: Some(ChatParameters {
                tool_choice: Some(ToolChoice::Mode(ToolChoiceMode::None)),
                ..Default::default()
            }),
            fallbacks: None,
            raw_body: None,
        };

        let wire = anthropic::MessagesRequest::from(request);
        assert_eq!(wire.tool_choice, Some(anthropic::ToolChoice::None));
    }

    #[test]
    fn data_uri_image_becomes_base64_source() {
        let source = image_url_to_source("data:image/png;base64,AAAA");
        assert!(
            matches!(source, anthropic::ImageSource::Base64 { ref media_type, ref data }
                if media_type == "image/png" && data == "AAAA")
        );

        let source = image_url_to_source("https://example.com/cat.png");
        assert!(matches!(source, anthropic::ImageSource::Url { .. }));
    }

    #[test]
    fn sse_encoder_opens_stream_and_text_block() {
        let mut encoder = SseEncoder::new();

        let events = encoder.encode(&chunk(
            0,
            MessageDelta {
                role: Some(ChatRole::Assistant),
                content: None,
                thought: None,
                tool_calls: None,
            },
            None,
        ));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), "message_start");

        let events = encoder.encode(&chunk(
            1,
            MessageDelta {
                role: None,
                content: Some("Hello".into()),
                thought: None,
                tool_calls: None,
            },
            None,
        ));
        assert_eq!(events[0].event_name(), "content_block_start");
        assert_eq!(events[1].event_name(), "content_block_delta");
    }

    #[test]
    fn sse_encoder_tool_call_sequence() {
        let mut encoder = SseEncoder::new();

        encoder.encode(&chunk(
            0,
            MessageDelta {
                role: Some(ChatRole::Assistant),
                ..Default::default()
            },
            None,
        ));

        let events = encoder.encode(&chunk(
            1,
            MessageDelta {
                tool_calls: Some(vec![ToolCallDelta::Start {
                    index: 0,
                    id: "toolu_1".into(),
                    function: FunctionStart {
                        name: "get_weather".into(),
                        arguments: String::new(),
                    },
                }]),
                ..Default::default()
            },
            None,
        ));
        assert_eq!(events.len(), 1);
        let anthropic::StreamEvent::ContentBlockStart { content_block, .. } = &events[0] else {
            unreachable!("expected content_block_start");
        };
        assert!(matches!(content_block, anthropic::Content::ToolUse { name, .. } if name == "get_weather"));

        let events = encoder.encode(&chunk(
            2,
            MessageDelta {
                tool_calls: Some(vec![ToolCallDelta::Delta {
                    index: 0,
                    function: super::super::FunctionDelta {
                        arguments: r#"{"location":"SF"}"#.into(),
                    },
                }]),
                ..Default::default()
            },
            None,
        ));
        let anthropic::StreamEvent::ContentBlockDelta { delta, .. } = &events[0] else {
            unreachable!("expected content_block_delta");
        };
        assert!(
            matches!(delta, anthropic::ContentDelta::InputJsonDelta { partial_json } if partial_json.contains("SF"))
        );

        let events = encoder.encode(&chunk(3, MessageDelta::default(), Some(FinishReason::ToolCalls)));
        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(names, vec!["content_block_stop", "message_delta", "message_stop"]);
    }

    #[test]
    fn sse_text_rendering_includes_event_name_and_data() {
        let rendered = event_to_sse(&anthropic::StreamEvent::Ping);
        assert_eq!(rendered, "event: ping\ndata: {\"type\":\"ping\"}\n\n");
    }
}
