//! Response and stream conversion for the Cohere v2 API.

use serde::Deserialize;

use super::input::CohereToolCall;
use crate::messages::canonical::{
    ChatChoice, ChatMessage, ChatResponse, ChatRole, ChatStreamChunk, FinishReason, FunctionCall, FunctionDelta,
    FunctionStart, MessageContent, MessageDelta, ProviderId, StreamChoice, ToolCall, ToolCallDelta, ToolCallKind,
    Usage,
};

#[derive(Debug, Deserialize)]
pub struct CohereChatResponse {
    pub id: String,

    #[serde(default)]
    pub finish_reason: Option<String>,

    pub message: CohereResponseMessage,

    #[serde(default)]
    pub usage: Option<CohereUsage>,
}

#[derive(Debug, Deserialize)]
pub struct CohereResponseMessage {
    #[serde(default)]
    pub content: Vec<CohereContent>,

    #[serde(default)]
    pub tool_calls: Vec<CohereToolCall>,

    #[serde(default)]
    pub tool_plan: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CohereContent {
    Text { text: String },

    #[serde(untagged)]
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CohereUsage {
    #[serde(default)]
    pub tokens: Option<CohereTokens>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CohereTokens {
    #[serde(default)]
    pub input_tokens: f64,

    #[serde(default)]
    pub output_tokens: f64,
}

impl From<CohereUsage> for Usage {
    fn from(usage: CohereUsage) -> Self {
        let tokens = usage.tokens.unwrap_or(CohereTokens {
            input_tokens: 0.0,
            output_tokens: 0.0,
        });

        Usage {
            prompt_tokens: tokens.input_tokens as u32,
            completion_tokens: tokens.output_tokens as u32,
            total_tokens: 0,
            prompt_details: None,
            completion_details: None,
        }
        .fill_total()
    }
}

impl From<CohereChatResponse> for ChatResponse {
    fn from(response: CohereChatResponse) -> Self {
        let text: String = response
            .message
            .content
            .iter()
            .filter_map(|content| match content {
                CohereContent::Text { text } => Some(text.as_str()),
                CohereContent::Other(_) => None,
            })
            .collect();

        let tool_calls: Vec<ToolCall> = response
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                kind: ToolCallKind::Function,
                function: FunctionCall {
                    name: call.function.name,
                    arguments: call.function.arguments,
                },
            })
            .collect();

        let message = ChatMessage {
            role: ChatRole::Assistant,
            content: if text.is_empty() { None } else { Some(MessageContent::Text(text)) },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            thought: response.message.tool_plan,
            tool_call_id: None,
        };

        Self {
            id: response.id,
            model: String::new(),
            provider: ProviderId::Cohere,
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: response.finish_reason.as_deref().map(FinishReason::from_cohere),
            }],
            usage: response.usage.map(Usage::from),
            created: crate::messages::canonical::now_unix(),
            extras: Default::default(),
        }
    }
}

/// Cohere v2 stream events: the SSE `data` payload is tagged with a
/// kebab-case `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum CohereStreamEvent {
    #[serde(rename = "message-start")]
    MessageStart {
        #[serde(default)]
        id: Option<String>,
    },

    #[serde(rename = "content-start")]
    ContentStart {},

    #[serde(rename = "content-delta")]
    ContentDelta { delta: CohereDelta },

    #[serde(rename = "content-end")]
    ContentEnd {},

    #[serde(rename = "tool-plan-delta")]
    ToolPlanDelta { delta: CohereDelta },

    #[serde(rename = "tool-call-start")]
    ToolCallStart {
        #[serde(default)]
        index: Option<usize>,
        delta: CohereDelta,
    },

    #[serde(rename = "tool-call-delta")]
    ToolCallDelta {
        #[serde(default)]
        index: Option<usize>,
        delta: CohereDelta,
    },

    #[serde(rename = "tool-call-end")]
    ToolCallEnd {},

    #[serde(rename = "message-end")]
    MessageEnd { delta: CohereMessageEnd },

    #[serde(untagged)]
    Unknown(serde_json::Value),
}

#[derive(Debug, Default, Deserialize)]
pub struct CohereDelta {
    #[serde(default)]
    pub message: Option<CohereDeltaMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CohereDeltaMessage {
    #[serde(default)]
    pub content: Option<CohereDeltaContent>,

    #[serde(default)]
    pub tool_plan: Option<String>,

    #[serde(default)]
    pub tool_calls: Option<CohereDeltaToolCall>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CohereDeltaContent {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CohereDeltaToolCall {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub function: Option<CohereDeltaFunction>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CohereDeltaFunction {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CohereMessageEnd {
    #[serde(default)]
    pub finish_reason: Option<String>,

    #[serde(default)]
    pub usage: Option<CohereUsage>,
}

/// Per-stream translation state: Cohere does not repeat tool-call indices on
/// deltas, so the current tool index is tracked here.
pub(super) struct CohereStreamState {
    id: String,
    model: String,
    started: bool,
    current_tool: usize,
    tool_count: usize,
}

impl CohereStreamState {
    pub(super) fn new(model: String) -> Self {
        Self {
            id: String::new(),
            model,
            started: false,
            current_tool: 0,
            tool_count: 0,
        }
    }

    fn chunk(&self, delta: MessageDelta, finish: Option<FinishReason>) -> ChatStreamChunk {
        ChatStreamChunk {
            id: self.id.clone(),
            model: self.model.clone(),
            provider: ProviderId::Cohere,
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage: None,
            chunk_index: 0,
        }
    }

    pub(super) fn process(&mut self, event: CohereStreamEvent) -> Option<ChatStreamChunk> {
        match event {
            CohereStreamEvent::MessageStart { id } => {
                self.id = id.unwrap_or_else(|| format!("cohere-{}", uuid::Uuid::new_v4()));
                self.started = true;

                Some(self.chunk(
                    MessageDelta {
                        role: Some(ChatRole::Assistant),
                        ..Default::default()
                    },
                    None,
                ))
            }

            CohereStreamEvent::ContentDelta { delta } => {
                let text = delta.message.and_then(|m| m.content).and_then(|c| c.text)?;
                Some(self.chunk(
                    MessageDelta {
                        content: Some(text),
                        ..Default::default()
                    },
                    None,
                ))
            }

            CohereStreamEvent::ToolPlanDelta { delta } => {
                let plan = delta.message.and_then(|m| m.tool_plan)?;
                Some(self.chunk(
                    MessageDelta {
                        thought: Some(plan),
                        ..Default::default()
                    },
                    None,
                ))
            }

            CohereStreamEvent::ToolCallStart { index, delta } => {
                let call = delta.message.and_then(|m| m.tool_calls)?;
                let function = call.function.unwrap_or_default();

                self.current_tool = index.unwrap_or(self.tool_count);
                self.tool_count = self.current_tool + 1;

                Some(self.chunk(
                    MessageDelta {
                        tool_calls: Some(vec![ToolCallDelta::Start {
                            index: self.current_tool,
                            id: call.id.unwrap_or_default(),
                            function: FunctionStart {
                                name: function.name.unwrap_or_default(),
                                arguments: function.arguments.unwrap_or_default(),
                            },
                        }]),
                        ..Default::default()
                    },
                    None,
                ))
            }

            CohereStreamEvent::ToolCallDelta { index, delta } => {
                let call = delta.message.and_then(|m| m.tool_calls)?;
                let arguments = call.function.and_then(|f| f.arguments)?;

                Some(self.chunk(
                    MessageDelta {
                        tool_calls: Some(vec![ToolCallDelta::Delta {
                            index: index.unwrap_or(self.current_tool),
                            function: FunctionDelta { arguments },
                        }]),
                        ..Default::default()
                    },
                    None,
                ))
            }

            CohereStreamEvent::MessageEnd { delta } => {
                let finish = delta
                    .finish_reason
                    .as_deref()
                    .map(FinishReason::from_cohere)
                    .unwrap_or(FinishReason::Stop);

                let mut chunk = self.chunk(MessageDelta::default(), Some(finish));
                chunk.usage = delta.usage.map(Usage::from);
                Some(chunk)
            }

            CohereStreamEvent::ContentStart {}
            | CohereStreamEvent::ContentEnd {}
            | CohereStreamEvent::ToolCallEnd {} => None,

            CohereStreamEvent::Unknown(value) => {
                log::debug!("Ignoring unknown Cohere stream event: {value}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_response_converts_to_canonical() {
        let response: CohereChatResponse = serde_json::from_value(json!({
            "id": "res_1",
            "finish_reason": "TOOL_CALL",
            "message": {
                "tool_plan": "I will check the weather.",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "get_weather", "arguments": "{\"location\":\"SF\"}" }
                }],
                "content": []
            },
            "usage": { "tokens": { "input_tokens": 20.0, "output_tokens": 10.0 } }
        }))
        .unwrap();

        let canonical = ChatResponse::from(response);
        let choice = &canonical.choices[0];

        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(choice.message.thought.as_deref(), Some("I will check the weather."));
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].function.name, "get_weather");
        assert_eq!(canonical.usage.unwrap().total_tokens, 30);
    }

    #[test]
    fn stream_state_translates_event_sequence() {
        let mut state = CohereStreamState::new("command-r-plus".into());

        let start: CohereStreamEvent =
            serde_json::from_value(json!({ "type": "message-start", "id": "res_1" })).unwrap();
        let chunk = state.process(start).unwrap();
        assert_eq!(chunk.choices[0].delta.role, Some(ChatRole::Assistant));

        let delta: CohereStreamEvent = serde_json::from_value(json!({
            "type": "content-delta",
            "delta": { "message": { "content": { "text": "Hel" } } }
        }))
        .unwrap();
        let chunk = state.process(delta).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));

        let end: CohereStreamEvent = serde_json::from_value(json!({
            "type": "message-end",
            "delta": { "finish_reason": "COMPLETE", "usage": { "tokens": { "input_tokens": 5.0, "output_tokens": 2.0 } } }
        }))
        .unwrap();
        let chunk = state.process(end).unwrap();
        assert_eq!(chunk.choices[0].finish_reason, Some(FinishReason::Stop));
        assert!(chunk.usage.is_some());
    }

    #[test]
    fn tool_call_stream_tracks_current_index() {
        let mut state = CohereStreamState::new("command-r-plus".into());

        let start: CohereStreamEvent = serde_json::from_value(json!({
            "type": "tool-call-start",
            "index": 0,
            "delta": { "message": { "tool_calls": {
                "id": "call_1",
                "function": { "name": "get_weather", "arguments": "" }
            } } }
        }))
        .unwrap();
        let chunk = state.process(start).unwrap();
        let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert!(matches!(&calls[0], ToolCallDelta::Start { index: 0, .. }));

        let delta: CohereStreamEvent = serde_json::from_value(json!({
            "type": "tool-call-delta",
            "delta": { "message": { "tool_calls": { "function": { "arguments": "{\"loc" } } } }
        }))
        .unwrap();
        let chunk = state.process(delta).unwrap();
        let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert!(matches!(&calls[0], ToolCallDelta::Delta { index: 0, function }
            if function.arguments == "{\"loc"));
    }
}
