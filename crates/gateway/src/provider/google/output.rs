//! Response conversion for the Gemini GenerateContent API.

use serde::Deserialize;

use crate::messages::canonical::{
    ChatChoice, ChatMessage, ChatResponse, ChatRole, ChatStreamChunk, ContentBlock, FinishReason, FunctionCall,
    MessageContent, MessageDelta, ProviderId, StreamChoice, ToolCall, ToolCallDelta, ToolCallKind, Usage,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,

    #[serde(default)]
    pub model_version: Option<String>,

    #[serde(default)]
    pub response_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<super::input::GoogleContent>,

    #[serde(default)]
    pub finish_reason: Option<String>,

    #[serde(default)]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,

    #[serde(default)]
    pub candidates_token_count: u32,

    #[serde(default)]
    pub total_token_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct BatchEmbedResponse {
    #[serde(default)]
    pub embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingValues {
    #[serde(default)]
    pub values: Vec<f32>,
}

impl From<UsageMetadata> for Usage {
    fn from(metadata: UsageMetadata) -> Self {
        Usage {
            prompt_tokens: metadata.prompt_token_count,
            completion_tokens: metadata.candidates_token_count,
            total_tokens: metadata.total_token_count,
            prompt_details: None,
            completion_details: None,
        }
        .fill_total()
    }
}

fn candidate_to_message(candidate: Candidate) -> (ChatMessage, Option<FinishReason>) {
    let mut blocks: Vec<ContentBlock> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut thought: Option<String> = None;
    let mut saw_function_call = false;

    for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            if part.thought == Some(true) {
                match &mut thought {
                    Some(existing) => existing.push_str(&text),
                    None => thought = Some(text),
                }
            } else {
                blocks.push(ContentBlock::Text { text });
            }
        } else if let Some(call) = part.function_call {
            saw_function_call = true;
            // Gemini does not assign call IDs; synthesize one so tool
            // results can be correlated canonically.
            tool_calls.push(ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4()),
                kind: ToolCallKind::Function,
                function: FunctionCall {
                    arguments: FunctionCall::arguments_from_value(&call.args),
                    name: call.name,
                },
            });
        } else {
            log::debug!("Ignoring unsupported Gemini response part");
        }
    }

    let content = match blocks.len() {
        0 => None,
        1 => blocks.pop().map(|block| match block {
            ContentBlock::Text { text } => MessageContent::Text(text),
            other => MessageContent::Blocks(vec![other]),
        }),
        _ => Some(MessageContent::Blocks(blocks)),
    };

    let finish_reason = match candidate.finish_reason.as_deref() {
        Some(reason) if saw_function_call && reason == "STOP" => Some(FinishReason::ToolCalls),
        Some(reason) => Some(FinishReason::from_google(reason)),
        None if saw_function_call => Some(FinishReason::ToolCalls),
        None => None,
    };

    let message = ChatMessage {
        role: ChatRole::Assistant,
        content,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        thought,
        tool_call_id: None,
    };

    (message, finish_reason)
}

impl From<GenerateContentResponse> for ChatResponse {
    fn from(response: GenerateContentResponse) -> Self {
        let usage = response.usage_metadata.map(Usage::from);

        let choices = response
            .candidates
            .into_iter()
            .enumerate()
            .map(|(fallback_index, candidate)| {
                let index = candidate.index.unwrap_or(fallback_index as u32);
                let (message, finish_reason) = candidate_to_message(candidate);
                ChatChoice {
                    index,
                    message,
                    finish_reason,
                }
            })
            .collect();

        Self {
            id: response
                .response_id
                .unwrap_or_else(|| format!("gemini-{}", uuid::Uuid::new_v4())),
            model: response.model_version.unwrap_or_default(),
            provider: ProviderId::Vertex,
            choices,
            usage,
            created: crate::messages::canonical::now_unix(),
            extras: Default::default(),
        }
    }
}

/// Streaming frames are whole `GenerateContentResponse` values; each maps to
/// one canonical chunk. The first chunk of a stream gets the role stamped by
/// the driver.
pub(super) fn response_to_chunk(response: GenerateContentResponse, first: bool) -> ChatStreamChunk {
    let usage = response.usage_metadata.map(Usage::from);
    let id = response
        .response_id
        .clone()
        .unwrap_or_else(|| format!("gemini-{}", uuid::Uuid::new_v4()));
    let model = response.model_version.clone().unwrap_or_default();

    let choices = response
        .candidates
        .into_iter()
        .enumerate()
        .map(|(fallback_index, candidate)| {
            let index = candidate.index.unwrap_or(fallback_index as u32);
            let (message, finish_reason) = candidate_to_message(candidate);

            let tool_calls = message.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .enumerate()
                    .map(|(call_index, call)| ToolCallDelta::Start {
                        index: call_index,
                        id: call.id,
                        function: crate::messages::canonical::FunctionStart {
                            name: call.function.name,
                            arguments: call.function.arguments,
                        },
                    })
                    .collect()
            });

            StreamChoice {
                index,
                delta: MessageDelta {
                    role: first.then_some(ChatRole::Assistant),
                    content: match message.content {
                        Some(MessageContent::Text(text)) => Some(text),
                        Some(MessageContent::Blocks(blocks)) => {
                            let joined: String = blocks
                                .iter()
                                .filter_map(|block| match block {
                                    ContentBlock::Text { text } => Some(text.as_str()),
                                    _ => None,
                                })
                                .collect();
                            if joined.is_empty() { None } else { Some(joined) }
                        }
                        None => None,
                    },
                    thought: message.thought,
                    tool_calls,
                },
                finish_reason,
            }
        })
        .collect();

    ChatStreamChunk {
        id,
        model,
        provider: ProviderId::Vertex,
        choices,
        usage,
        chunk_index: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn function_call_candidate_maps_to_tool_calls() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Checking the weather." },
                        { "functionCall": { "name": "get_weather", "args": { "location": "SF" } } }
                    ]
                },
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 8, "totalTokenCount": 20 }
        }))
        .unwrap();

        let canonical = ChatResponse::from(response);
        let choice = &canonical.choices[0];

        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));

        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
        assert!(calls[0].id.starts_with("call_"));

        let parsed: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(parsed["location"], "SF");
    }

    #[test]
    fn safety_block_maps_to_content_filter() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [] },
                "finishReason": "SAFETY"
            }]
        }))
        .unwrap();

        let canonical = ChatResponse::from(response);
        assert_eq!(canonical.choices[0].finish_reason, Some(FinishReason::ContentFilter));
    }

    #[test]
    fn stream_frame_becomes_content_chunk() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Hel" }] }
            }]
        }))
        .unwrap();

        let chunk = response_to_chunk(response, true);

        assert_eq!(chunk.choices[0].delta.role, Some(ChatRole::Assistant));
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));
        assert!(chunk.choices[0].finish_reason.is_none());
    }
}
