//! Conversions from Anthropic wire types to canonical types.
//!
//! Two callers: the inbound dialect path (a client speaking Anthropic-native
//! to the gateway) and the outbound driver decoding `api.anthropic.com`
//! responses.

use crate::messages::{
    anthropic,
    canonical::{
        ChatChoice, ChatMessage, ChatParameters, ChatRequest, ChatResponse, ChatRole, ContentBlock, FinishReason,
        FunctionCall, FunctionDefinition, MessageContent, ProviderId, ToolCall, ToolCallKind, ToolChoice,
        ToolChoiceMode, ToolDefinition, Usage,
    },
};

impl From<anthropic::MessagesRequest> for ChatRequest {
    fn from(req: anthropic::MessagesRequest) -> Self {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);

        if let Some(system) = req.system {
            messages.push(ChatMessage::text(ChatRole::System, system));
        }

        for message in req.messages {
            convert_message_into(message, &mut messages);
        }

        let params = ChatParameters {
            max_tokens: Some(req.max_tokens),
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            stop_sequences: req.stop_sequences,
            tools: req
                .tools
                .map(|tools| tools.into_iter().map(ToolDefinition::from).collect()),
            tool_choice: req.tool_choice.map(ToolChoice::from),
            user: req.metadata.and_then(|m| m.user_id),
            ..Default::default()
        };

        Self {
            provider: ProviderId::Anthropic,
            model: req.model,
            messages,
            params: Some(params),
            fallbacks: None,
            raw_body: None,
        }
    }
}

/// Flatten one Anthropic message into canonical messages.
///
/// Anthropic embeds tool results inside user messages; the canonical model
/// gives them their own tool-role message, so a user message may split into
/// several canonical messages. Block order is preserved: content preceding a
/// tool result is flushed before the tool message is emitted.
fn convert_message_into(message: anthropic::Message, out: &mut Vec<ChatMessage>) {
    let role = match message.role {
        anthropic::Role::User => ChatRole::User,
        anthropic::Role::Assistant => ChatRole::Assistant,
    };

    let blocks = match message.content {
        anthropic::MessageBody::Text(text) => {
            out.push(ChatMessage::text(role, text));
            return;
        }
        anthropic::MessageBody::Blocks(blocks) => blocks,
    };

    let mut pending_blocks: Vec<ContentBlock> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut thought: Option<String> = None;

    for block in blocks {
        match block {
            anthropic::Content::Text { text } => pending_blocks.push(ContentBlock::Text { text }),
            anthropic::Content::Image { source } => pending_blocks.push(ContentBlock::Image {
                url: image_source_to_url(source),
            }),
            anthropic::Content::Thinking { thinking, .. } => match &mut thought {
                Some(existing) => existing.push_str(&thinking),
                None => thought = Some(thinking),
            },
            anthropic::Content::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id,
                    kind: ToolCallKind::Function,
                    function: FunctionCall {
                        arguments: FunctionCall::arguments_from_value(&input),
                        name,
                    },
                });
            }
            anthropic::Content::ToolResult {
                tool_use_id,
                content,
                is_error: _,
            } => {
                flush_pending(&role, &mut pending_blocks, out);
                out.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: Some(tool_result_content(content)),
                    tool_calls: None,
                    thought: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
            anthropic::Content::Unknown(value) => {
                log::debug!("Dropping unknown Anthropic content block: {value}");
            }
        }
    }

    if pending_blocks.is_empty() && tool_calls.is_empty() && thought.is_none() {
        return;
    }

    out.push(ChatMessage {
        role,
        content: collapse_blocks(pending_blocks),
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        thought,
        tool_call_id: None,
    });
}

fn flush_pending(role: &ChatRole, pending: &mut Vec<ContentBlock>, out: &mut Vec<ChatMessage>) {
    if pending.is_empty() {
        return;
    }

    out.push(ChatMessage {
        role: role.clone(),
        content: collapse_blocks(std::mem::take(pending)),
        tool_calls: None,
        thought: None,
        tool_call_id: None,
    });
}

/// A single text block collapses to the plain-string shape; anything else
/// keeps the ordered block list.
fn collapse_blocks(blocks: Vec<ContentBlock>) -> Option<MessageContent> {
    match blocks.len() {
        0 => None,
        1 if matches!(blocks[0], ContentBlock::Text { .. }) => {
            let Some(ContentBlock::Text { text }) = blocks.into_iter().next() else {
                unreachable!("matched a text block");
            };
            Some(MessageContent::Text(text))
        }
        _ => Some(MessageContent::Blocks(blocks)),
    }
}

fn tool_result_content(body: anthropic::ToolResultBody) -> MessageContent {
    match body {
        anthropic::ToolResultBody::Text(text) => MessageContent::Text(text),
        anthropic::ToolResultBody::Blocks(blocks) => {
            let converted: Vec<ContentBlock> = blocks
                .into_iter()
                .filter_map(|block| match block {
                    anthropic::Content::Text { text } => Some(ContentBlock::Text { text }),
                    anthropic::Content::Image { source } => Some(ContentBlock::Image {
                        url: image_source_to_url(source),
                    }),
                    other => {
                        log::debug!("Dropping unsupported tool result block: {other:?}");
                        None
                    }
                })
                .collect();

            collapse_blocks(converted).unwrap_or_else(|| MessageContent::Text(String::new()))
        }
    }
}

/// Canonical images are URLs; inline data becomes a `data:` URI.
pub(crate) fn image_source_to_url(source: anthropic::ImageSource) -> String {
    match source {
        anthropic::ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        anthropic::ImageSource::Url { url } => url,
    }
}

impl From<anthropic::Tool> for ToolDefinition {
    fn from(tool: anthropic::Tool) -> Self {
        Self {
            kind: ToolCallKind::Function,
            function: FunctionDefinition {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
                strict: None,
            },
        }
    }
}

impl From<anthropic::ToolChoice> for ToolChoice {
    fn from(choice: anthropic::ToolChoice) -> Self {
        match choice {
            anthropic::ToolChoice::Auto => ToolChoice::Mode(ToolChoiceMode::Auto),
            anthropic::ToolChoice::Any => ToolChoice::Mode(ToolChoiceMode::Required),
            anthropic::ToolChoice::None => ToolChoice::Mode(ToolChoiceMode::None),
            anthropic::ToolChoice::Tool { name } => ToolChoice::Function { name },
        }
    }
}

impl From<anthropic::Usage> for Usage {
    fn from(usage: anthropic::Usage) -> Self {
        let prompt_details = usage.cache_read_input_tokens.map(|cached| super::PromptTokenDetails {
            cached_tokens: Some(cached),
            audio_tokens: None,
        });

        Usage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: 0,
            prompt_details,
            completion_details: None,
        }
        .fill_total()
    }
}

impl From<anthropic::MessagesResponse> for ChatResponse {
    fn from(response: anthropic::MessagesResponse) -> Self {
        let mut blocks: Vec<ContentBlock> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut thought: Option<String> = None;

        for block in response.content {
            match block {
                anthropic::Content::Text { text } => blocks.push(ContentBlock::Text { text }),
                anthropic::Content::Image { source } => blocks.push(ContentBlock::Image {
                    url: image_source_to_url(source),
                }),
                anthropic::Content::Thinking { thinking, .. } => match &mut thought {
                    Some(existing) => existing.push_str(&thinking),
                    None => thought = Some(thinking),
                },
                anthropic::Content::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    kind: ToolCallKind::Function,
                    function: FunctionCall {
                        arguments: FunctionCall::arguments_from_value(&input),
                        name,
                    },
                }),
                other => {
                    log::warn!("Unexpected content block in Anthropic response: {other:?}");
                }
            }
        }

        let message = ChatMessage {
            role: ChatRole::Assistant,
            content: collapse_blocks(blocks),
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            thought,
            tool_call_id: None,
        };

        let finish_reason = response.stop_reason.as_deref().map(FinishReason::from_anthropic);

        Self {
            id: response.id,
            model: response.model,
            provider: ProviderId::Anthropic,
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason,
            }],
            usage: Some(Usage::from(response.usage)),
            created: super::now_unix(),
            extras: super::ResponseExtras {
                stop_sequence: response.stop_sequence,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_field_becomes_leading_system_message() {
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-5-haiku-latest",
            "max_tokens": 512,
            "system": "Be terse.",
            "messages": [
                { "role": "user", "content": "hello" }
            ]
        }))
        .unwrap();

        let canonical = ChatRequest::from(request);

        assert_eq!(canonical.messages.len(), 2);
        assert_eq!(canonical.messages[0].role, ChatRole::System);
        assert_eq!(canonical.messages[0].text_content().as_deref(), Some("Be terse."));
        assert_eq!(canonical.messages[1].role, ChatRole::User);
        assert_eq!(canonical.params.as_ref().unwrap().max_tokens, Some(512));
    }

    #[test]
    fn tool_result_blocks_split_into_tool_messages() {
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-5-haiku-latest",
            "max_tokens": 512,
            "messages": [
                { "role": "user", "content": [
                    { "type": "tool_result", "tool_use_id": "toolu_1", "content": "72F and sunny" },
                    { "type": "text", "text": "and now answer" }
                ]}
            ]
        }))
        .unwrap();

        let canonical = ChatRequest::from(request);

        assert_eq!(canonical.messages.len(), 2);
        assert_eq!(canonical.messages[0].role, ChatRole::Tool);
        assert_eq!(canonical.messages[0].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(canonical.messages[0].text_content().as_deref(), Some("72F and sunny"));
        assert_eq!(canonical.messages[1].role, ChatRole::User);
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls_with_json_arguments() {
        let request: anthropic::MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-5-haiku-latest",
            "max_tokens": 512,
            "messages": [
                { "role": "assistant", "content": [
                    { "type": "text", "text": "Checking." },
                    { "type": "tool_use", "id": "toolu_1", "name": "get_weather",
                      "input": { "location": "San Francisco" } }
                ]}
            ]
        }))
        .unwrap();

        let canonical = ChatRequest::from(request);
        let assistant = &canonical.messages[0];

        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.name, "get_weather");

        let parsed: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(parsed["location"], "San Francisco");
    }

    #[test]
    fn response_thinking_maps_to_thought() {
        let response: anthropic::MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-haiku-latest",
            "content": [
                { "type": "thinking", "thinking": "one word only", "signature": "sig" },
                { "type": "text", "text": "Hello" }
            ],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": { "input_tokens": 12, "output_tokens": 4 }
        }))
        .unwrap();

        let canonical = ChatResponse::from(response);
        let message = &canonical.choices[0].message;

        assert_eq!(message.thought.as_deref(), Some("one word only"));
        assert_eq!(message.text_content().as_deref(), Some("Hello"));
        assert_eq!(canonical.choices[0].finish_reason, Some(FinishReason::Stop));

        let usage = canonical.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.total_tokens, 16);
    }

    #[test]
    fn base64_image_source_becomes_data_uri() {
        let url = image_source_to_url(anthropic::ImageSource::Base64 {
            media_type: "image/png".into(),
            data: "AAAA".into(),
        });
        assert_eq!(url, "data:image/png;base64,AAAA");
    }
}
