//! Conversions from canonical types to OpenAI wire types.
//!
//! Used by the OpenAI and Mistral drivers on the way out and by the
//! dialect-out path when a client spoke the chat-completions surface.

use crate::messages::{
    canonical::{
        ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatStreamChunk, ContentBlock, EmbeddingRequest,
        MessageContent, TextCompletionInput, TextCompletionRequest, ToolCall, ToolCallDelta, ToolChoice,
        ToolChoiceMode, ToolDefinition, Usage,
    },
    openai,
};

impl From<ChatRole> for openai::ChatRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::System => openai::ChatRole::System,
            ChatRole::Developer => openai::ChatRole::Developer,
            ChatRole::User => openai::ChatRole::User,
            ChatRole::Assistant => openai::ChatRole::Assistant,
            ChatRole::Tool => openai::ChatRole::Tool,
            ChatRole::Other(raw) => openai::ChatRole::Other(raw),
        }
    }
}

impl From<ContentBlock> for openai::ContentPart {
    fn from(block: ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => openai::ContentPart::Text { text },
            ContentBlock::Image { url } => openai::ContentPart::ImageUrl {
                image_url: openai::ImageUrl { url, detail: None },
            },
            ContentBlock::InputAudio { data, format } => openai::ContentPart::InputAudio {
                input_audio: openai::InputAudio {
                    data,
                    format: format.unwrap_or_else(|| "wav".to_string()),
                },
            },
            ContentBlock::Refusal { refusal } => openai::ContentPart::Refusal { refusal },
        }
    }
}

impl From<MessageContent> for openai::MessageContent {
    fn from(content: MessageContent) -> Self {
        match content {
            MessageContent::Text(text) => openai::MessageContent::Text(text),
            MessageContent::Blocks(blocks) => {
                openai::MessageContent::Parts(blocks.into_iter().map(openai::ContentPart::from).collect())
            }
        }
    }
}

impl From<ToolCall> for openai::ToolCall {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            tool_type: openai::ToolType::Function,
            function: openai::FunctionCall {
                name: call.function.name,
                arguments: call.function.arguments,
            },
        }
    }
}

impl From<ChatMessage> for openai::ChatMessage {
    fn from(message: ChatMessage) -> Self {
        // Thought has no chat-completions field; it stays canonical-side and
        // reappears on surfaces that carry reasoning (Anthropic, Responses).
        Self {
            role: openai::ChatRole::from(message.role),
            content: message.content.map(openai::MessageContent::from),
            tool_calls: message
                .tool_calls
                .map(|calls| calls.into_iter().map(openai::ToolCall::from).collect()),
            tool_call_id: message.tool_call_id,
        }
    }
}

impl From<ToolDefinition> for openai::Tool {
    fn from(tool: ToolDefinition) -> Self {
        Self {
            tool_type: openai::ToolType::Function,
            function: openai::FunctionDefinition {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
                strict: tool.function.strict,
            },
        }
    }
}

impl From<ToolChoice> for openai::ToolChoice {
    fn from(choice: ToolChoice) -> Self {
        match choice {
            ToolChoice::Mode(ToolChoiceMode::None) => openai::ToolChoice::Mode(openai::ToolChoiceMode::None),
            ToolChoice::Mode(ToolChoiceMode::Auto) => openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto),
            ToolChoice::Mode(ToolChoiceMode::Required) => openai::ToolChoice::Mode(openai::ToolChoiceMode::Required),
            ToolChoice::Function { name } => openai::ToolChoice::Specific {
                choice_type: openai::ToolType::Function,
                function: openai::FunctionChoice { name },
            },
        }
    }
}

impl From<ChatRequest> for openai::ChatCompletionRequest {
    fn from(request: ChatRequest) -> Self {
        let params = request.params.unwrap_or_default();

        Self {
            model: request.model,
            messages: request.messages.into_iter().map(openai::ChatMessage::from).collect(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            stop: params.stop_sequences,
            stream: None,
            stream_options: None,
            tools: params
                .tools
                .map(|tools| tools.into_iter().map(openai::Tool::from).collect()),
            tool_choice: params.tool_choice.map(openai::ToolChoice::from),
            parallel_tool_calls: params.parallel_tool_calls,
            user: params.user,
        }
    }
}

impl From<&Usage> for openai::Usage {
    fn from(usage: &Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            prompt_tokens_details: usage.prompt_details.as_ref().map(|details| openai::PromptTokensDetails {
                cached_tokens: details.cached_tokens,
                audio_tokens: details.audio_tokens,
            }),
            completion_tokens_details: usage
                .completion_details
                .as_ref()
                .map(|details| openai::CompletionTokensDetails {
                    reasoning_tokens: details.reasoning_tokens,
                    audio_tokens: details.audio_tokens,
                }),
        }
    }
}

impl From<ChatResponse> for openai::ChatCompletionResponse {
    fn from(response: ChatResponse) -> Self {
        Self {
            id: response.id,
            object: "chat.completion".to_string(),
            created: response.created,
            model: response.model,
            usage: response.usage.as_ref().map(openai::Usage::from),
            choices: response
                .choices
                .into_iter()
                .map(|choice| openai::ChatChoice {
                    index: choice.index,
                    message: openai::ChatMessage::from(choice.message),
                    finish_reason: choice.finish_reason.map(|reason| reason.as_openai().to_string()),
                })
                .collect(),
        }
    }
}

impl From<ToolCallDelta> for openai::StreamingToolCall {
    fn from(delta: ToolCallDelta) -> Self {
        match delta {
            ToolCallDelta::Start { index, id, function } => openai::StreamingToolCall::Start {
                index,
                id,
                tool_type: openai::ToolType::Function,
                function: openai::FunctionStart {
                    name: function.name,
                    arguments: function.arguments,
                },
            },
            ToolCallDelta::Delta { index, function } => openai::StreamingToolCall::Delta {
                index,
                function: openai::FunctionDelta {
                    arguments: function.arguments,
                },
            },
        }
    }
}

impl From<ChatStreamChunk> for openai::ChatCompletionChunk {
    fn from(chunk: ChatStreamChunk) -> Self {
        Self {
            id: chunk.id,
            object: "chat.completion.chunk".to_string(),
            created: super::now_unix(),
            model: chunk.model,
            usage: chunk.usage.as_ref().map(openai::Usage::from),
            choices: chunk
                .choices
                .into_iter()
                .map(|choice| openai::ChatChoiceDelta {
                    index: choice.index,
                    delta: openai::ChatMessageDelta {
                        role: choice.delta.role.map(openai::ChatRole::from),
                        content: choice.delta.content,
                        tool_calls: choice
                            .delta
                            .tool_calls
                            .map(|calls| calls.into_iter().map(openai::StreamingToolCall::from).collect()),
                    },
                    finish_reason: choice.finish_reason.map(|reason| reason.as_openai().to_string()),
                })
                .collect(),
        }
    }
}

/// Render one chunk as a chat-completions SSE frame.
pub fn chunk_to_sse(chunk: ChatStreamChunk) -> String {
    let wire = openai::ChatCompletionChunk::from(chunk);
    let data = serde_json::to_string(&wire).unwrap_or_else(|e| {
        log::error!("Failed to serialize chat completion chunk: {e}");
        r#"{"error":"serialization failed"}"#.to_string()
    });

    format!("data: {data}\n\n")
}

/// Stream terminator for the chat-completions SSE dialect.
pub const SSE_DONE_FRAME: &str = "data: [DONE]\n\n";

impl From<TextCompletionRequest> for openai::CompletionRequest {
    fn from(request: TextCompletionRequest) -> Self {
        let params = request.params.unwrap_or_default();

        Self {
            model: request.model,
            prompt: match request.input {
                TextCompletionInput::Single(prompt) => openai::PromptInput::Single(prompt),
                TextCompletionInput::Batch(prompts) => openai::PromptInput::Batch(prompts),
            },
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop: params.stop_sequences,
            stream: None,
            user: params.user,
        }
    }
}

impl From<EmbeddingRequest> for openai::EmbeddingRequest {
    fn from(request: EmbeddingRequest) -> Self {
        Self {
            model: request.model,
            input: request.input,
            encoding_format: request.encoding_format,
            dimensions: request.dimensions,
        }
    }
}
