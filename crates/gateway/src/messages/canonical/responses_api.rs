//! Canonical model for the Responses API superset.
//!
//! The Responses surface carries an ordered item list rather than plain
//! messages; items cover function calling, reasoning, and the managed tool
//! families (computer use, MCP, file search, web search, local shell).
//! The bridge at the bottom lowers a Responses request onto the canonical
//! chat model so any chat-capable provider can serve it, and lifts the chat
//! result back into Responses items.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    ChatMessage, ChatParameters, ChatRequest, ChatResponse, ChatRole, FinishReason, FunctionCall, MessageContent,
    ProviderId, ToolCall, ToolCallKind, Usage,
};

/// Request on the Responses surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub provider: ProviderId,
    pub model: String,

    /// Ordered input items.
    pub input: Vec<ResponsesItem>,

    /// System-level guidance; the Responses analog of a system message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ChatParameters>,
}

/// One item in a Responses conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesItem {
    /// A plain conversation message.
    Message {
        role: ChatRole,
        content: MessageContent,
    },

    /// Function invocation requested by the model.
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        name: String,
        /// JSON-encoded arguments, same canonical form as chat tool calls.
        arguments: String,
    },

    /// Caller-supplied result of a function call.
    FunctionCallOutput { call_id: String, output: String },

    /// Model reasoning surfaced as its own item.
    Reasoning {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        text: String,
    },

    /// Computer-use action requested by the model.
    ComputerCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        action: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    /// Result of a computer-use action, typically a screenshot reference.
    ComputerCallOutput { call_id: String, output: Value },

    /// Call into an MCP server tool.
    McpCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        server_label: String,
        name: String,
        arguments: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },

    /// Managed file-search invocation.
    FileSearchCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        queries: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        results: Option<Value>,
    },

    /// Managed web-search invocation.
    WebSearchCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    /// Managed local-shell invocation.
    LocalShellCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        action: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    /// Approval request for an MCP tool the caller gated.
    McpApprovalRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        server_label: String,
        name: String,
        arguments: String,
    },
}

/// Result on the Responses surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub id: String,
    pub model: String,
    pub provider: ProviderId,

    /// Ordered output items.
    pub output: Vec<ResponsesItem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    pub created: u64,

    /// `completed`, `incomplete`, or a provider-specific status.
    pub status: String,
}

impl ResponsesRequest {
    /// Lower onto the canonical chat model.
    ///
    /// Function calls become assistant tool calls, outputs become tool-role
    /// messages, reasoning becomes the assistant `thought`; managed tool
    /// items (computer/MCP/search/shell) have no chat equivalent and are
    /// carried as function-shaped calls so the conversation stays coherent.
    pub fn into_chat(self) -> ChatRequest {
        let mut messages: Vec<ChatMessage> = Vec::with_capacity(self.input.len() + 1);

        if let Some(instructions) = self.instructions {
            messages.push(ChatMessage::text(ChatRole::System, instructions));
        }

        for item in self.input {
            match item {
                ResponsesItem::Message { role, content } => messages.push(ChatMessage {
                    role,
                    content: Some(content),
                    tool_calls: None,
                    thought: None,
                    tool_call_id: None,
                }),
                ResponsesItem::FunctionCall {
                    call_id, name, arguments, ..
                } => push_assistant_call(&mut messages, call_id, name, arguments),
                ResponsesItem::FunctionCallOutput { call_id, output } => {
                    messages.push(tool_output_message(call_id, output));
                }
                ResponsesItem::Reasoning { text, .. } => match messages.last_mut() {
                    Some(last) if last.role == ChatRole::Assistant && last.thought.is_none() => {
                        last.thought = Some(text);
                    }
                    _ => messages.push(ChatMessage {
                        role: ChatRole::Assistant,
                        content: None,
                        tool_calls: None,
                        thought: Some(text),
                        tool_call_id: None,
                    }),
                },
                ResponsesItem::ComputerCall { call_id, action, .. } => {
                    push_assistant_call(&mut messages, call_id, "computer".into(), action.to_string());
                }
                ResponsesItem::ComputerCallOutput { call_id, output } => {
                    messages.push(tool_output_message(call_id, output.to_string()));
                }
                ResponsesItem::McpCall {
                    id,
                    server_label,
                    name,
                    arguments,
                    output,
                } => {
                    let call_id = id.unwrap_or_else(|| format!("mcp_{server_label}_{name}"));
                    push_assistant_call(&mut messages, call_id.clone(), format!("{server_label}.{name}"), arguments);
                    if let Some(output) = output {
                        messages.push(tool_output_message(call_id, output));
                    }
                }
                ResponsesItem::LocalShellCall { call_id, action, .. } => {
                    push_assistant_call(&mut messages, call_id, "local_shell".into(), action.to_string());
                }
                ResponsesItem::FileSearchCall { .. }
                | ResponsesItem::WebSearchCall { .. }
                | ResponsesItem::McpApprovalRequest { .. } => {
                    // Provider-managed items carry no caller-visible payload a
                    // chat provider could act on; they are dropped when
                    // lowering.
                    log::debug!("Dropping provider-managed Responses item when lowering to chat");
                }
            }
        }

        ChatRequest {
            provider: self.provider,
            model: self.model,
            messages,
            params: self.params,
            fallbacks: None,
            raw_body: None,
        }
    }
}

fn push_assistant_call(messages: &mut Vec<ChatMessage>, call_id: String, name: String, arguments: String) {
    let call = ToolCall {
        id: call_id,
        kind: ToolCallKind::Function,
        function: FunctionCall { name, arguments },
    };

    match messages.last_mut() {
        Some(last) if last.role == ChatRole::Assistant && last.tool_call_id.is_none() => {
            last.tool_calls.get_or_insert_with(Vec::new).push(call);
        }
        _ => messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: None,
            tool_calls: Some(vec![call]),
            thought: None,
            tool_call_id: None,
        }),
    }
}

fn tool_output_message(call_id: String, output: String) -> ChatMessage {
    ChatMessage {
        role: ChatRole::Tool,
        content: Some(MessageContent::Text(output)),
        tool_calls: None,
        thought: None,
        tool_call_id: Some(call_id),
    }
}

impl ResponsesResponse {
    /// Lift a canonical chat response back onto the Responses surface.
    pub fn from_chat(response: ChatResponse) -> Self {
        let mut output = Vec::new();
        let mut status = "completed".to_string();

        for choice in &response.choices {
            if let Some(thought) = &choice.message.thought {
                output.push(ResponsesItem::Reasoning {
                    id: None,
                    text: thought.clone(),
                });
            }

            if let Some(content) = &choice.message.content {
                output.push(ResponsesItem::Message {
                    role: ChatRole::Assistant,
                    content: content.clone(),
                });
            }

            for call in choice.message.tool_calls.iter().flatten() {
                output.push(ResponsesItem::FunctionCall {
                    id: None,
                    call_id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                });
            }

            if choice.finish_reason == Some(FinishReason::Length) {
                status = "incomplete".to_string();
            }
        }

        Self {
            id: response.id,
            model: response.model,
            provider: response.provider,
            output,
            usage: response.usage,
            created: response.created,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::canonical::ChatChoice;
    use serde_json::json;

    #[test]
    fn items_decode_by_type_tag() {
        let item: ResponsesItem = serde_json::from_value(json!({
            "type": "function_call",
            "call_id": "call_1",
            "name": "get_weather",
            "arguments": "{\"location\":\"SF\"}"
        }))
        .unwrap();
        assert!(matches!(item, ResponsesItem::FunctionCall { ref name, .. } if name == "get_weather"));

        let item: ResponsesItem = serde_json::from_value(json!({
            "type": "computer_call",
            "call_id": "call_2",
            "action": { "type": "click", "x": 10, "y": 20 }
        }))
        .unwrap();
        assert!(matches!(item, ResponsesItem::ComputerCall { .. }));

        let item: ResponsesItem = serde_json::from_value(json!({
            "type": "mcp_approval_request",
            "server_label": "deploy",
            "name": "restart",
            "arguments": "{}"
        }))
        .unwrap();
        assert!(matches!(item, ResponsesItem::McpApprovalRequest { .. }));
    }

    #[test]
    fn lowering_builds_tool_call_conversation() {
        let request = ResponsesRequest {
            provider: ProviderId::OpenAi,
            model: "gpt-4o".into(),
            instructions: Some("Be helpful.".into()),
            input: vec![
                ResponsesItem::Message {
                    role: ChatRole::User,
                    content: MessageContent::Text("weather in SF?".into()),
                },
                ResponsesItem::FunctionCall {
                    id: None,
                    call_id: "call_1".into(),
                    name: "get_weather".into(),
                    arguments: r#"{"location":"SF"}"#.into(),
                },
                ResponsesItem::FunctionCallOutput {
                    call_id: "call_1".into(),
                    output: "72F".into(),
                },
            ],
            params: None,
        };

        let chat = request.into_chat();

        assert_eq!(chat.messages.len(), 4);
        assert_eq!(chat.messages[0].role, ChatRole::System);
        assert_eq!(chat.messages[1].role, ChatRole::User);
        assert_eq!(chat.messages[2].role, ChatRole::Assistant);
        assert_eq!(
            chat.messages[2].tool_calls.as_ref().unwrap()[0].function.name,
            "get_weather"
        );
        assert_eq!(chat.messages[3].role, ChatRole::Tool);
        assert_eq!(chat.messages[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn reasoning_attaches_to_adjacent_assistant_call() {
        let request = ResponsesRequest {
            provider: ProviderId::OpenAi,
            model: "gpt-4o".into(),
            instructions: None,
            input: vec![
                ResponsesItem::FunctionCall {
                    id: None,
                    call_id: "call_1".into(),
                    name: "search".into(),
                    arguments: "{}".into(),
                },
                ResponsesItem::Reasoning {
                    id: None,
                    text: "need fresh data".into(),
                },
            ],
            params: None,
        };

        let chat = request.into_chat();

        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].thought.as_deref(), Some("need fresh data"));
    }

    #[test]
    fn lifting_preserves_order_and_marks_truncation() {
        let response = ChatResponse {
            id: "resp-1".into(),
            model: "gpt-4o".into(),
            provider: ProviderId::OpenAi,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content: Some(MessageContent::Text("partial answer".into())),
                    tool_calls: Some(vec![ToolCall {
                        id: "call_1".into(),
                        kind: Default::default(),
                        function: FunctionCall {
                            name: "search".into(),
                            arguments: "{}".into(),
                        },
                    }]),
                    thought: Some("thinking...".into()),
                    tool_call_id: None,
                },
                finish_reason: Some(FinishReason::Length),
            }],
            usage: None,
            created: 1700000000,
            extras: Default::default(),
        };

        let lifted = ResponsesResponse::from_chat(response);

        assert_eq!(lifted.status, "incomplete");
        assert!(matches!(lifted.output[0], ResponsesItem::Reasoning { .. }));
        assert!(matches!(lifted.output[1], ResponsesItem::Message { .. }));
        assert!(matches!(lifted.output[2], ResponsesItem::FunctionCall { .. }));
    }
}
