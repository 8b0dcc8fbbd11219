//! Request conversion for the Gemini GenerateContent API.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::media;
use crate::messages::canonical::{
    ChatRequest, ChatRole, ContentBlock, MessageContent, ToolChoice, ToolChoiceMode, ToolDefinition,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<GoogleContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GoogleTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GoogleContent>,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct GoogleContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    pub parts: Vec<GooglePart>,
}

/// One part of a content entry. Exactly one field is set.
#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GoogleFunctionCall>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GoogleFunctionResponse>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub file_uri: String,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct GoogleFunctionCall {
    pub name: String,

    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct GoogleFunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleTool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallingConfig {
    pub mode: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

/// Embedding request for `models/{model}:batchEmbedContents`.
#[derive(Debug, Serialize)]
pub struct BatchEmbedRequest {
    pub requests: Vec<EmbedContentRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedContentRequest {
    pub model: String,
    pub content: GoogleContent,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dimensionality: Option<u32>,
}

impl From<ChatRequest> for GenerateContentRequest {
    fn from(request: ChatRequest) -> Self {
        let params = request.params.unwrap_or_default();

        // function_response parts need the function name, which canonical
        // tool messages do not carry; recover it from the assistant call IDs.
        let mut call_names: HashMap<String, String> = HashMap::new();
        for message in &request.messages {
            for call in message.tool_calls.iter().flatten() {
                call_names.insert(call.id.clone(), call.function.name.clone());
            }
        }

        let mut system_parts: Vec<GooglePart> = Vec::new();
        let mut contents: Vec<GoogleContent> = Vec::new();

        for message in request.messages {
            match message.role {
                ChatRole::System | ChatRole::Developer => {
                    if let Some(text) = message.text_content() {
                        system_parts.push(GooglePart {
                            text: Some(text),
                            ..Default::default()
                        });
                    }
                }
                ChatRole::Tool => {
                    let call_id = message.tool_call_id.clone().unwrap_or_default();
                    let name = call_names.get(&call_id).cloned().unwrap_or(call_id);
                    let output = message.text_content().unwrap_or_default();

                    contents.push(GoogleContent {
                        role: Some("user".to_string()),
                        parts: vec![GooglePart {
                            function_response: Some(GoogleFunctionResponse {
                                name,
                                response: serde_json::json!({ "result": output }),
                            }),
                            ..Default::default()
                        }],
                    });
                }
                role => {
                    let google_role = if role == ChatRole::Assistant { "model" } else { "user" };
                    let mut parts: Vec<GooglePart> = Vec::new();

                    match message.content {
                        Some(MessageContent::Text(text)) => {
                            if !text.is_empty() {
                                parts.push(GooglePart {
                                    text: Some(text),
                                    ..Default::default()
                                });
                            }
                        }
                        Some(MessageContent::Blocks(blocks)) => {
                            parts.extend(blocks.into_iter().filter_map(block_to_part));
                        }
                        None => {}
                    }

                    for call in message.tool_calls.into_iter().flatten() {
                        parts.push(GooglePart {
                            function_call: Some(GoogleFunctionCall {
                                args: call.function.parsed_arguments(),
                                name: call.function.name,
                            }),
                            ..Default::default()
                        });
                    }

                    if !parts.is_empty() {
                        contents.push(GoogleContent {
                            role: Some(google_role.to_string()),
                            parts,
                        });
                    }
                }
            }
        }

        let generation_config = Some(GenerationConfig {
            max_output_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            stop_sequences: params.stop_sequences,
        });

        let tools = params.tools.map(|tools| {
            vec![GoogleTool {
                function_declarations: tools.into_iter().map(FunctionDeclaration::from).collect(),
            }]
        });

        let tool_config = params.tool_choice.map(|choice| ToolConfig {
            function_calling_config: match choice {
                ToolChoice::Mode(ToolChoiceMode::Auto) => FunctionCallingConfig {
                    mode: "AUTO",
                    allowed_function_names: None,
                },
                ToolChoice::Mode(ToolChoiceMode::Required) => FunctionCallingConfig {
                    mode: "ANY",
                    allowed_function_names: None,
                },
                ToolChoice::Mode(ToolChoiceMode::None) => FunctionCallingConfig {
                    mode: "NONE",
                    allowed_function_names: None,
                },
                ToolChoice::Function { name } => FunctionCallingConfig {
                    mode: "ANY",
                    allowed_function_names: Some(vec![name]),
                },
            },
        });

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GoogleContent {
                role: None,
                parts: system_parts,
            })
        };

        Self {
            contents,
            generation_config,
            tools,
            tool_config,
            system_instruction,
        }
    }
}

fn block_to_part(block: ContentBlock) -> Option<GooglePart> {
    match block {
        ContentBlock::Text { text } => Some(GooglePart {
            text: Some(text),
            ..Default::default()
        }),
        ContentBlock::Image { url } => {
            let sanitized = media::sanitize_image_url(&url);
            match media::extract_url_type_info(&sanitized) {
                media::UrlTypeInfo::Base64 { media_type, data } => Some(GooglePart {
                    inline_data: Some(InlineData {
                        mime_type: media_type.unwrap_or_else(|| "image/jpeg".to_string()),
                        data,
                    }),
                    ..Default::default()
                }),
                media::UrlTypeInfo::Remote => Some(GooglePart {
                    file_data: Some(FileData {
                        mime_type: None,
                        file_uri: sanitized,
                    }),
                    ..Default::default()
                }),
            }
        }
        ContentBlock::InputAudio { .. } => {
            log::debug!("Dropping input_audio block for Gemini request");
            None
        }
        ContentBlock::Refusal { refusal } => Some(GooglePart {
            text: Some(refusal),
            ..Default::default()
        }),
    }
}

impl From<ToolDefinition> for FunctionDeclaration {
    fn from(tool: ToolDefinition) -> Self {
        Self {
            name: tool.function.name,
            description: if tool.function.description.is_empty() {
                None
            } else {
                Some(tool.function.description)
            },
            parameters: Some(strip_unsupported_schema_fields(tool.function.parameters)),
        }
    }
}

/// Gemini rejects several JSON Schema keywords; strip them recursively.
fn strip_unsupported_schema_fields(mut value: Value) -> Value {
    if let Some(object) = value.as_object_mut() {
        object.remove("additionalProperties");
        object.remove("$schema");
        object.remove("default");

        // String formats are restricted: only "enum" and "date-time" are
        // accepted, anything else fails the request.
        if object.get("type").and_then(Value::as_str) == Some("string")
            && let Some(format) = object.get("format").and_then(Value::as_str)
            && format != "enum"
            && format != "date-time"
        {
            object.remove("format");
        }

        if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
            for (_, property) in properties.iter_mut() {
                *property = strip_unsupported_schema_fields(property.take());
            }
        }

        if let Some(items) = object.get_mut("items") {
            *items = strip_unsupported_schema_fields(items.take());
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::canonical::{
        ChatMessage, ChatParameters, FunctionCall, ProviderId, ToolCall,
    };
    use serde_json::json;

    #[test]
    fn system_messages_become_system_instruction() {
        let request = ChatRequest {
            provider: ProviderId::Vertex,
            model: "gemini-2.0-flash".into(),
            messages: vec![
                ChatMessage::text(ChatRole::System, "Be terse."),
                ChatMessage::text(ChatRole::User, "hello"),
            ],
            params: Some(ChatParameters {
                max_tokens: Some(128),
                ..Default::default()
            }),
            fallbacks: None,
            raw_body: None,
        };

        let wire = GenerateContentRequest::from(request);
        let value = serde_json::to_value(&wire).unwrap();

        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "Be terse.");
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 128);
    }

    #[test]
    fn tool_messages_become_function_responses_with_recovered_names() {
        let assistant = ChatMessage {
            role: ChatRole::Assistant,
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call_1".into(),
                kind: Default::default(),
                function: FunctionCall {
                    name: "get_weather".into(),
                    arguments: r#"{"location":"SF"}"#.into(),
                },
            }]),
            thought: None,
            tool_call_id: None,
        };

        let mut tool = ChatMessage::text(ChatRole::Tool, "72F");
        tool.tool_call_id = Some("call_1".into());

        let request = ChatRequest {
            provider: ProviderId::Vertex,
            model: "gemini-2.0-flash".into(),
            messages: vec![assistant, tool],
            params: None,
            fallbacks: None,
            raw_body: None,
        };

        let wire = GenerateContentRequest::from(request);
        let value = serde_json::to_value(&wire).unwrap();

        assert_eq!(value["contents"][0]["role"], "model");
        assert_eq!(value["contents"][0]["parts"][0]["functionCall"]["name"], "get_weather");
        assert_eq!(
            value["contents"][1]["parts"][0]["functionResponse"]["name"],
            "get_weather"
        );
        assert_eq!(
            value["contents"][1]["parts"][0]["functionResponse"]["response"]["result"],
            "72F"
        );
    }

    #[test]
    fn schema_stripping_removes_unsupported_fields() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "location": { "type": "string", "default": "SF" },
                "tags": { "type": "array", "items": { "type": "string", "default": "x" } }
            }
        });

        let stripped = strip_unsupported_schema_fields(schema);

        assert!(stripped.get("$schema").is_none());
        assert!(stripped.get("additionalProperties").is_none());
        assert!(stripped["properties"]["location"].get("default").is_none());
        assert!(stripped["properties"]["tags"]["items"].get("default").is_none());
    }

    #[test]
    fn schema_stripping_restricts_string_formats() {
        let schema = json!({
            "type": "object",
            "properties": {
                "email": { "type": "string", "format": "email" },
                "when": { "type": "string", "format": "date-time" },
                "kind": { "type": "string", "format": "enum" },
                "count": { "type": "integer", "format": "int64" }
            }
        });

        let stripped = strip_unsupported_schema_fields(schema);

        assert!(stripped["properties"]["email"].get("format").is_none());
        assert_eq!(stripped["properties"]["when"]["format"], "date-time");
        assert_eq!(stripped["properties"]["kind"]["format"], "enum");
        // Only string formats are restricted.
        assert_eq!(stripped["properties"]["count"]["format"], "int64");
    }

    #[test]
    fn forced_function_maps_to_any_mode_with_allowlist() {
        let request = ChatRequest {
            provider: ProviderId::Vertex,
            model: "gemini-2.0-flash".into(),
            messages: vec![ChatMessage::text(ChatRole::User, "hi")],
            params: Some(ChatParameters {
                tool_choice: Some(ToolChoice::Function {
                    name: "get_weather".into(),
                }),
                ..Default::default()
            }),
            fallbacks: None,
            raw_body: None,
        };

        let wire = GenerateContentRequest::from(request);
        let value = serde_json::to_value(&wire).unwrap();

        assert_eq!(value["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
        assert_eq!(
            value["toolConfig"]["functionCallingConfig"]["allowedFunctionNames"][0],
            "get_weather"
        );
    }
}
