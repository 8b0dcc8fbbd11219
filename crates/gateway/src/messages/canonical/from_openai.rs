//! Conversions from OpenAI wire types to canonical types.

use crate::messages::{
    canonical::{
        ChatChoice, ChatMessage, ChatParameters, ChatRequest, ChatResponse, ChatRole, ChatStreamChunk,
        CompletionChoice, CompletionTokenDetails, ContentBlock, FinishReason, FunctionCall, FunctionDefinition,
        FunctionDelta, FunctionStart, MessageContent, MessageDelta, PromptTokenDetails, ProviderId, StreamChoice,
        TextCompletionResponse, ToolCall, ToolCallDelta, ToolCallKind, ToolChoice, ToolChoiceMode, ToolDefinition,
        Usage,
    },
    openai,
};

impl From<openai::ChatRole> for ChatRole {
    fn from(role: openai::ChatRole) -> Self {
        match role {
            openai::ChatRole::System => ChatRole::System,
            openai::ChatRole::Developer => ChatRole::Developer,
            openai::ChatRole::User => ChatRole::User,
            openai::ChatRole::Assistant => ChatRole::Assistant,
            openai::ChatRole::Tool => ChatRole::Tool,
            openai::ChatRole::Other(raw) => ChatRole::Other(raw),
        }
    }
}

impl From<openai::MessageContent> for MessageContent {
    fn from(content: openai::MessageContent) -> Self {
        match content {
            openai::MessageContent::Text(text) => MessageContent::Text(text),
            openai::MessageContent::Parts(parts) => {
                MessageContent::Blocks(parts.into_iter().map(ContentBlock::from).collect())
            }
        }
    }
}

impl From<openai::ContentPart> for ContentBlock {
    fn from(part: openai::ContentPart) -> Self {
        match part {
            openai::ContentPart::Text { text } => ContentBlock::Text { text },
            openai::ContentPart::ImageUrl { image_url } => ContentBlock::Image { url: image_url.url },
            openai::ContentPart::InputAudio { input_audio } => ContentBlock::InputAudio {
                data: input_audio.data,
                format: Some(input_audio.format),
            },
            openai::ContentPart::Refusal { refusal } => ContentBlock::Refusal { refusal },
        }
    }
}

impl From<openai::ToolCall> for ToolCall {
    fn from(call: openai::ToolCall) -> Self {
        Self {
            id: call.id,
            kind: ToolCallKind::Function,
            function: FunctionCall {
                name: call.function.name,
                arguments: call.function.arguments,
            },
        }
    }
}

impl From<openai::ChatMessage> for ChatMessage {
    fn from(message: openai::ChatMessage) -> Self {
        Self {
            role: ChatRole::from(message.role),
            content: message.content.map(MessageContent::from),
            tool_calls: message
                .tool_calls
                .map(|calls| calls.into_iter().map(ToolCall::from).collect()),
            thought: None,
            tool_call_id: message.tool_call_id,
        }
    }
}

impl From<openai::Tool> for ToolDefinition {
    fn from(tool: openai::Tool) -> Self {
        Self {
            kind: ToolCallKind::Function,
            function: FunctionDefinition {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
                strict: tool.function.strict,
            },
        }
    }
}

impl From<openai::ToolChoice> for ToolChoice {
    fn from(choice: openai::ToolChoice) -> Self {
        match choice {
            openai::ToolChoice::Mode(openai::ToolChoiceMode::None) => ToolChoice::Mode(ToolChoiceMode::None),
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto) => ToolChoice::Mode(ToolChoiceMode::Auto),
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Required) => ToolChoice::Mode(ToolChoiceMode::Required),
            openai::ToolChoice::Specific { function, .. } => ToolChoice::Function { name: function.name },
        }
    }
}

impl From<openai::ChatCompletionRequest> for ChatRequest {
    fn from(req: openai::ChatCompletionRequest) -> Self {
        let params = ChatParameters {
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            frequency_penalty: req.frequency_penalty,
            presence_penalty: req.presence_penalty,
            stop_sequences: req.stop,
            tools: req.tools.map(|tools| tools.into_iter().map(ToolDefinition::from).collect()),
            tool_choice: req.tool_choice.map(ToolChoice::from),
            parallel_tool_calls: req.parallel_tool_calls,
            user: req.user,
            ..Default::default()
        };

        Self {
            provider: ProviderId::OpenAi,
            model: req.model,
            messages: req.messages.into_iter().map(ChatMessage::from).collect(),
            params: Some(params),
            fallbacks: None,
            raw_body: None,
        }
    }
}

impl From<openai::Usage> for Usage {
    fn from(usage: openai::Usage) -> Self {
        Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            prompt_details: usage.prompt_tokens_details.map(|details| PromptTokenDetails {
                cached_tokens: details.cached_tokens,
                audio_tokens: details.audio_tokens,
            }),
            completion_details: usage.completion_tokens_details.map(|details| CompletionTokenDetails {
                reasoning_tokens: details.reasoning_tokens,
                audio_tokens: details.audio_tokens,
            }),
        }
        .fill_total()
    }
}

/// Decode path for the OpenAI driver and any OpenAI-compatible provider.
/// The caller stamps the real provider tag afterwards.
impl From<openai::ChatCompletionResponse> for ChatResponse {
    fn from(response: openai::ChatCompletionResponse) -> Self {
        Self {
            id: response.id,
            model: response.model,
            provider: ProviderId::OpenAi,
            choices: response
                .choices
                .into_iter()
                .map(|choice| ChatChoice {
                    index: choice.index,
                    message: ChatMessage::from(choice.message),
                    finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_openai),
                })
                .collect(),
            usage: response.usage.map(Usage::from),
            created: response.created,
            extras: Default::default(),
        }
    }
}

impl From<openai::StreamingToolCall> for ToolCallDelta {
    fn from(call: openai::StreamingToolCall) -> Self {
        match call {
            openai::StreamingToolCall::Start {
                index, id, function, ..
            } => ToolCallDelta::Start {
                index,
                id,
                function: FunctionStart {
                    name: function.name,
                    arguments: function.arguments,
                },
            },
            openai::StreamingToolCall::Delta { index, function } => ToolCallDelta::Delta {
                index,
                function: FunctionDelta {
                    arguments: function.arguments,
                },
            },
        }
    }
}

/// One SSE chunk; `chunk_index` is assigned by the stream pump.
impl From<openai::ChatCompletionChunk> for ChatStreamChunk {
    fn from(chunk: openai::ChatCompletionChunk) -> Self {
        Self {
            id: chunk.id,
            model: chunk.model,
            provider: ProviderId::OpenAi,
            choices: chunk
                .choices
                .into_iter()
                .map(|choice| StreamChoice {
                    index: choice.index,
                    delta: MessageDelta {
                        role: choice.delta.role.map(ChatRole::from),
                        content: choice.delta.content,
                        thought: None,
                        tool_calls: choice
                            .delta
                            .tool_calls
                            .map(|calls| calls.into_iter().map(ToolCallDelta::from).collect()),
                    },
                    finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_openai),
                })
                .collect(),
            usage: chunk.usage.map(Usage::from),
            chunk_index: 0,
        }
    }
}

impl From<openai::CompletionResponse> for TextCompletionResponse {
    fn from(response: openai::CompletionResponse) -> Self {
        Self {
            id: response.id,
            model: response.model,
            provider: ProviderId::OpenAi,
            choices: response
                .choices
                .into_iter()
                .map(|choice| CompletionChoice {
                    index: choice.index,
                    text: choice.text,
                    finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_openai),
                })
                .collect(),
            usage: response.usage.map(Usage::from),
            created: response.created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_round_trips_tools() {
        let request: openai::ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [
                { "role": "system", "content": "Be terse." },
                { "role": "user", "content": "weather in SF?" }
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "Get the weather",
                    "parameters": { "type": "object", "properties": { "location": { "type": "string" } } }
                }
            }],
            "tool_choice": "auto",
            "parallel_tool_calls": true
        }))
        .unwrap();

        let canonical = ChatRequest::from(request);

        assert_eq!(canonical.messages.len(), 2);
        assert_eq!(canonical.messages[0].role, ChatRole::System);

        let params = canonical.params.unwrap();
        assert_eq!(params.tools.as_ref().unwrap()[0].function.name, "get_weather");
        assert_eq!(params.tool_choice, Some(ToolChoice::Mode(ToolChoiceMode::Auto)));
        assert_eq!(params.parallel_tool_calls, Some(true));
    }

    #[test]
    fn response_conversion_maps_finish_reason_and_usage() {
        let response: openai::ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Hello!" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12 }
        }))
        .unwrap();

        let canonical = ChatResponse::from(response);

        assert_eq!(canonical.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(canonical.usage.as_ref().unwrap().total_tokens, 12);
        assert_eq!(
            canonical.choices[0].message.text_content().as_deref(),
            Some("Hello!")
        );
    }

    #[test]
    fn streaming_chunk_converts_tool_call_start() {
        let chunk: openai::ChatCompletionChunk = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "get_weather", "arguments": "" }
                    }]
                },
                "finish_reason": null
            }]
        }))
        .unwrap();

        let canonical = ChatStreamChunk::from(chunk);
        let calls = canonical.choices[0].delta.tool_calls.as_ref().unwrap();

        assert!(
            matches!(&calls[0], ToolCallDelta::Start { id, function, .. }
                if id == "call_1" && function.name == "get_weather")
        );
    }

    #[test]
    fn multimodal_parts_become_canonical_blocks() {
        let message: openai::ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [
                { "type": "text", "text": "what is this?" },
                { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAAA" } }
            ]
        }))
        .unwrap();

        let canonical = ChatMessage::from(message);
        let Some(MessageContent::Blocks(blocks)) = canonical.content else {
            unreachable!("expected blocks");
        };

        assert!(matches!(&blocks[1], ContentBlock::Image { url } if url.starts_with("data:image/png")));
    }
}
