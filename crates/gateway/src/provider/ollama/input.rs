//! Request conversion for the Ollama native API.

use serde::Serialize;
use serde_json::Value;

use crate::media;
use crate::messages::canonical::{
    ChatMessage, ChatParameters, ChatRequest, ChatRole, ContentBlock, MessageContent, ToolDefinition,
};

#[derive(Debug, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OllamaTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
pub struct OllamaMessage {
    pub role: &'static str,
    pub content: String,

    /// Base64 payloads without the data-URI prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OllamaToolCall>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunctionCall,
}

#[derive(Debug, Serialize)]
pub struct OllamaFunctionCall {
    pub name: String,

    /// Ollama takes structured arguments, not a JSON string.
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
pub struct OllamaTool {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: OllamaToolFunction,
}

#[derive(Debug, Serialize)]
pub struct OllamaToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Model options; Ollama spells `max_tokens` as `num_predict`.
#[derive(Debug, Serialize)]
pub struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

pub(super) fn options_from_params(params: &ChatParameters) -> Option<OllamaOptions> {
    let options = OllamaOptions {
        num_predict: params.max_tokens,
        temperature: params.temperature,
        top_p: params.top_p,
        top_k: params.top_k,
        frequency_penalty: params.frequency_penalty,
        presence_penalty: params.presence_penalty,
        stop: params.stop_sequences.clone(),
    };

    let empty = options.num_predict.is_none()
        && options.temperature.is_none()
        && options.top_p.is_none()
        && options.top_k.is_none()
        && options.frequency_penalty.is_none()
        && options.presence_penalty.is_none()
        && options.stop.is_none();

    (!empty).then_some(options)
}

impl From<ChatRequest> for OllamaChatRequest {
    fn from(request: ChatRequest) -> Self {
        let params = request.params.unwrap_or_default();

        let tools = params.tools.as_ref().map(|tools| {
            tools
                .iter()
                .cloned()
                .map(|tool: ToolDefinition| OllamaTool {
                    tool_type: "function",
                    function: OllamaToolFunction {
                        name: tool.function.name,
                        description: tool.function.description,
                        parameters: tool.function.parameters,
                    },
                })
                .collect()
        });

        Self {
            model: request.model,
            messages: request.messages.into_iter().map(OllamaMessage::from).collect(),
            stream: false,
            tools,
            options: options_from_params(&params),
        }
    }
}

impl From<ChatMessage> for OllamaMessage {
    fn from(message: ChatMessage) -> Self {
        let role = match message.role {
            ChatRole::System | ChatRole::Developer => "system",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
            _ => "user",
        };

        let mut text = String::new();
        let mut images: Vec<String> = Vec::new();

        match message.content {
            Some(MessageContent::Text(content)) => text = content,
            Some(MessageContent::Blocks(blocks)) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(&t),
                        ContentBlock::Image { url } => {
                            let sanitized = media::sanitize_image_url(&url);
                            match media::extract_url_type_info(&sanitized) {
                                media::UrlTypeInfo::Base64 { data, .. } => images.push(data),
                                media::UrlTypeInfo::Remote => {
                                    log::debug!("Dropping remote image URL for Ollama; only inline data is supported");
                                }
                            }
                        }
                        ContentBlock::Refusal { refusal } => text.push_str(&refusal),
                        ContentBlock::InputAudio { .. } => {
                            log::debug!("Dropping input_audio block for Ollama request");
                        }
                    }
                }
            }
            None => {}
        }

        let tool_calls = message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| OllamaToolCall {
                    function: OllamaFunctionCall {
                        arguments: call.function.parsed_arguments(),
                        name: call.function.name,
                    },
                })
                .collect()
        });

        Self {
            role,
            content: text,
            images: if images.is_empty() { None } else { Some(images) },
            tool_calls,
            thinking: message.thought,
        }
    }
}

/// Request for `POST /api/generate`.
#[derive(Debug, Serialize)]
pub struct OllamaGenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
}

/// Request for `POST /api/embed`.
#[derive(Debug, Serialize)]
pub struct OllamaEmbedRequest {
    pub model: String,
    pub input: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate: Option<bool>,
}
