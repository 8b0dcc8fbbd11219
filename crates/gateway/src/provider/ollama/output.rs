//! Response conversion for the Ollama native API.

use serde::Deserialize;
use serde_json::Value;

use crate::messages::canonical::{
    ChatChoice, ChatMessage, ChatResponse, ChatRole, ChatStreamChunk, FinishReason, FunctionCall, FunctionStart,
    MessageContent, MessageDelta, ProviderId, StreamChoice, ToolCall, ToolCallDelta, ToolCallKind, Usage,
};

#[derive(Debug, Deserialize)]
pub struct OllamaChatResponse {
    pub model: String,

    #[serde(default)]
    pub message: Option<OllamaResponseMessage>,

    pub done: bool,

    #[serde(default)]
    pub done_reason: Option<String>,

    #[serde(default)]
    pub prompt_eval_count: Option<u32>,

    #[serde(default)]
    pub eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaResponseMessage {
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub tool_calls: Vec<OllamaResponseToolCall>,

    #[serde(default)]
    pub thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaResponseToolCall {
    pub function: OllamaResponseFunction,
}

#[derive(Debug, Deserialize)]
pub struct OllamaResponseFunction {
    pub name: String,

    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Deserialize)]
pub struct OllamaGenerateResponse {
    pub model: String,

    #[serde(default)]
    pub response: String,

    pub done: bool,

    #[serde(default)]
    pub done_reason: Option<String>,

    #[serde(default)]
    pub prompt_eval_count: Option<u32>,

    #[serde(default)]
    pub eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaEmbedResponse {
    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,

    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
}

pub(super) fn done_reason_to_finish(reason: Option<&str>, has_tool_calls: bool) -> Option<FinishReason> {
    if has_tool_calls {
        return Some(FinishReason::ToolCalls);
    }

    reason.map(|reason| match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        other => FinishReason::Other(other.to_string()),
    })
}

pub(super) fn usage_from_counts(prompt: Option<u32>, completion: Option<u32>) -> Option<Usage> {
    if prompt.is_none() && completion.is_none() {
        return None;
    }

    Some(
        Usage {
            prompt_tokens: prompt.unwrap_or(0),
            completion_tokens: completion.unwrap_or(0),
            total_tokens: 0,
            prompt_details: None,
            completion_details: None,
        }
        .fill_total(),
    )
}

impl From<OllamaChatResponse> for ChatResponse {
    fn from(response: OllamaChatResponse) -> Self {
        let message = response.message.unwrap_or(OllamaResponseMessage {
            content: String::new(),
            tool_calls: Vec::new(),
            thinking: None,
        });

        let tool_calls: Vec<ToolCall> = message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| ToolCall {
                // Ollama does not assign call IDs.
                id: format!("call_{index}_{}", uuid::Uuid::new_v4()),
                kind: ToolCallKind::Function,
                function: FunctionCall {
                    arguments: FunctionCall::arguments_from_value(&call.function.arguments),
                    name: call.function.name,
                },
            })
            .collect();

        let has_tool_calls = !tool_calls.is_empty();

        let chat_message = ChatMessage {
            role: ChatRole::Assistant,
            content: if message.content.is_empty() {
                None
            } else {
                Some(MessageContent::Text(message.content))
            },
            tool_calls: if has_tool_calls { Some(tool_calls) } else { None },
            thought: message.thinking,
            tool_call_id: None,
        };

        Self {
            id: format!("ollama-{}", uuid::Uuid::new_v4()),
            model: response.model,
            provider: ProviderId::Ollama,
            choices: vec![ChatChoice {
                index: 0,
                message: chat_message,
                finish_reason: done_reason_to_finish(response.done_reason.as_deref(), has_tool_calls),
            }],
            usage: usage_from_counts(response.prompt_eval_count, response.eval_count),
            created: crate::messages::canonical::now_unix(),
            extras: Default::default(),
        }
    }
}

/// One NDJSON line of a streaming chat; the final line has `done: true` and
/// carries the token counts.
pub(super) fn response_to_chunk(response: OllamaChatResponse, id: &str, first: bool) -> ChatStreamChunk {
    let message = response.message.unwrap_or(OllamaResponseMessage {
        content: String::new(),
        tool_calls: Vec::new(),
        thinking: None,
    });

    let has_tool_calls = !message.tool_calls.is_empty();

    let tool_calls = if has_tool_calls {
        Some(
            message
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta::Start {
                    index,
                    id: format!("call_{index}_{}", uuid::Uuid::new_v4()),
                    function: FunctionStart {
                        arguments: FunctionCall::arguments_from_value(&call.function.arguments),
                        name: call.function.name,
                    },
                })
                .collect(),
        )
    } else {
        None
    };

    let finish_reason = if response.done {
        done_reason_to_finish(response.done_reason.as_deref(), has_tool_calls)
            .or(Some(FinishReason::Stop))
    } else {
        None
    };

    ChatStreamChunk {
        id: id.to_string(),
        model: response.model,
        provider: ProviderId::Ollama,
        choices: vec![StreamChoice {
            index: 0,
            delta: MessageDelta {
                role: first.then_some(ChatRole::Assistant),
                content: if message.content.is_empty() {
                    None
                } else {
                    Some(message.content)
                },
                thought: message.thinking,
                tool_calls,
            },
            finish_reason,
        }],
        usage: usage_from_counts(response.prompt_eval_count, response.eval_count),
        chunk_index: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_arguments_are_canonicalized_to_json_strings() {
        let response: OllamaChatResponse = serde_json::from_value(json!({
            "model": "llama3.2",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{ "function": { "name": "get_weather", "arguments": { "location": "SF" } } }]
            },
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 25,
            "eval_count": 10
        }))
        .unwrap();

        let canonical = ChatResponse::from(response);
        let choice = &canonical.choices[0];

        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));

        let calls = choice.message.tool_calls.as_ref().unwrap();
        let parsed: Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(parsed["location"], "SF");
        assert_eq!(canonical.usage.as_ref().unwrap().total_tokens, 35);
    }

    #[test]
    fn final_stream_line_carries_finish_and_usage() {
        let response: OllamaChatResponse = serde_json::from_value(json!({
            "model": "llama3.2",
            "message": { "role": "assistant", "content": "" },
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 5,
            "eval_count": 3
        }))
        .unwrap();

        let chunk = response_to_chunk(response, "stream-1", false);

        assert_eq!(chunk.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(chunk.usage.as_ref().unwrap().total_tokens, 8);
    }
}
