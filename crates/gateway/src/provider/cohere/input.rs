//! Request conversion for the Cohere v2 API.

use serde::Serialize;
use serde_json::Value;

use crate::messages::canonical::{
    ChatMessage, ChatRequest, ChatRole, EmbeddingRequest, MessageContent, ToolChoice, ToolChoiceMode, ToolDefinition,
};

#[derive(Debug, Serialize)]
pub struct CohereChatRequest {
    pub model: String,
    pub messages: Vec<CohereMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<CohereTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling; Cohere spells it `p`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<f32>,

    /// Top-k sampling; Cohere spells it `k`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CohereMessage {
    pub role: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<CohereToolCall>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Reasoning text preceding tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_plan: Option<String>,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct CohereToolCall {
    pub id: String,

    #[serde(rename = "type")]
    pub call_type: String,

    pub function: CohereFunction,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct CohereFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub struct CohereTool {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: CohereToolFunction,
}

#[derive(Debug, Serialize)]
pub struct CohereToolFunction {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub parameters: Value,
}

impl From<ChatRequest> for CohereChatRequest {
    fn from(request: ChatRequest) -> Self {
        let params = request.params.unwrap_or_default();

        // Cohere has no forced-function mode; `required` has no spelling
        // either, so tool choice degrades to presence/absence of tools.
        let tools = match params.tool_choice {
            Some(ToolChoice::Mode(ToolChoiceMode::None)) => None,
            _ => params.tools.map(|tools| tools.into_iter().map(CohereTool::from).collect()),
        };

        Self {
            model: request.model,
            messages: request.messages.into_iter().map(CohereMessage::from).collect(),
            tools,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            p: params.top_p,
            k: params.top_k,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            stop_sequences: params.stop_sequences,
            stream: None,
        }
    }
}

impl From<ChatMessage> for CohereMessage {
    fn from(message: ChatMessage) -> Self {
        let role = match message.role {
            ChatRole::System | ChatRole::Developer => "system",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
            _ => "user",
        };

        let content = match message.content {
            Some(MessageContent::Text(text)) => Some(text),
            Some(MessageContent::Blocks(_)) => message.text_content(),
            None => None,
        };

        Self {
            role,
            content,
            tool_calls: message.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|call| CohereToolCall {
                        id: call.id,
                        call_type: "function".to_string(),
                        function: CohereFunction {
                            name: call.function.name,
                            arguments: call.function.arguments,
                        },
                    })
                    .collect()
            }),
            tool_call_id: message.tool_call_id,
            tool_plan: message.thought,
        }
    }
}

impl From<ToolDefinition> for CohereTool {
    fn from(tool: ToolDefinition) -> Self {
        Self {
            tool_type: "function",
            function: CohereToolFunction {
                name: tool.function.name,
                description: if tool.function.description.is_empty() {
                    None
                } else {
                    Some(tool.function.description)
                },
                parameters: tool.function.parameters,
            },
        }
    }
}

/// Embedding request for `POST /v2/embed`.
#[derive(Debug, Serialize)]
pub struct CohereEmbedRequest {
    pub model: String,
    pub texts: Vec<String>,
    pub input_type: &'static str,
    pub embedding_types: Vec<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate: Option<&'static str>,
}

impl From<EmbeddingRequest> for CohereEmbedRequest {
    fn from(request: EmbeddingRequest) -> Self {
        Self {
            model: request.model,
            texts: request.input,
            input_type: "search_document",
            embedding_types: vec!["float"],
            truncate: request.truncate.map(|truncate| if truncate { "END" } else { "NONE" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::canonical::{ChatParameters, ProviderId};

    #[test]
    fn top_p_and_top_k_use_cohere_spellings() {
        let request = ChatRequest {
            provider: ProviderId::Cohere,
            model: "command-r-plus".into(),
            messages: vec![ChatMessage::text(ChatRole::User, "hello")],
            params: Some(ChatParameters {
                top_p: Some(0.9),
                top_k: Some(40),
                ..Default::default()
            }),
            fallbacks: None,
            raw_body: None,
        };

        let wire = CohereChatRequest::from(request);
        let value = serde_json::to_value(&wire).unwrap();

        assert!((value["p"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        assert_eq!(value["k"], 40);
        assert!(value.get("top_p").is_none());
    }

    #[test]
    fn thought_maps_to_tool_plan() {
        let mut message = ChatMessage::text(ChatRole::Assistant, "");
        message.thought = Some("check the forecast first".into());

        let wire = CohereMessage::from(message);
        assert_eq!(wire.tool_plan.as_deref(), Some("check the forecast first"));
    }

    #[test]
    fn tool_choice_none_drops_tools() {
        let request = ChatRequest {
            provider: ProviderId::Cohere,
            model: "command-r-plus".into(),
            messages: vec![ChatMessage::text(ChatRole::User, "hello")],
            params: Some(ChatParameters {
                tools: Some(vec![]),
                tool_choice: Some(ToolChoice::Mode(ToolChoiceMode::None)),
                ..Default::default()
            }),
            fallbacks: None,
            raw_body: None,
        };

        let wire = CohereChatRequest::from(request);
        assert!(wire.tools.is_none());
    }
}
