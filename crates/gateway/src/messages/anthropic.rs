//! Wire types for the Anthropic Messages API.
//!
//! One definition serves both directions: the outbound driver encodes these
//! types when talking to `api.anthropic.com`, and the inbound dialect path
//! decodes the same types when a client speaks Anthropic-native to the
//! gateway. See the [API reference](https://docs.anthropic.com/en/api/messages).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,

    /// Alternating user/assistant turns. System text lives in `system`, not
    /// here.
    pub messages: Vec<Message>,

    /// Required by the API; the converter defaults it to 4096 when the
    /// canonical request leaves it unset.
    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content: the API accepts a bare string or a block array.
/// Decoding tries the string shape first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Blocks(Vec<Content>),
}

/// A content block in a message or response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },

    Image {
        source: ImageSource,
    },

    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    ToolResult {
        tool_use_id: String,
        content: ToolResultBody,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },

    /// Extended-thinking block. The signature authenticates the thinking
    /// text when it is replayed in a later turn.
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Unknown block types are preserved so new API surface does not break
    /// the decode.
    #[serde(untagged)]
    Unknown(Value),
}

/// Tool result payload: a bare string or nested content blocks (text and
/// images, one level deep).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultBody {
    Text(String),
    Blocks(Vec<Content>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON Schema for the tool input.
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    /// Force any tool; the Anthropic spelling of `required`.
    Any,
    None,
    Tool {
        name: String,
    },
}

/// Response body for `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,

    /// Always `message`.
    pub r#type: String,

    pub role: Role,
    pub content: Vec<Content>,
    pub model: String,

    /// `end_turn`, `max_tokens`, `stop_sequence`, `tool_use`, or a newer
    /// value passed through verbatim.
    pub stop_reason: Option<String>,

    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// Token usage. In streaming `message_delta` events the input count may be
/// omitted; counts there are cumulative.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,

    #[serde(default)]
    pub output_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
}

/// Error detail shape shared by HTTP error bodies and stream `error` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Top-level error response: `{"type":"error","error":{...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub r#type: String,
    pub error: ErrorBody,
}

/// Server-sent events emitted by the streaming Messages API.
///
/// A stream opens with `message_start`, runs one or more content block
/// lifecycles (`content_block_start` → `content_block_delta*` →
/// `content_block_stop`), may emit `message_delta` updates, and terminates
/// with `message_stop`. `ping` may appear anywhere; `error` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: StreamMessageStart,
    },

    ContentBlockStart {
        index: u32,
        content_block: Content,
    },

    ContentBlockDelta {
        index: u32,
        delta: ContentDelta,
    },

    ContentBlockStop {
        index: u32,
    },

    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    MessageStop,

    Ping,

    Error {
        error: ErrorBody,
    },

    /// Future event types forwarded for graceful handling.
    #[serde(untagged)]
    Unknown(Value),
}

impl StreamEvent {
    /// SSE `event:` name for this payload.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Ping => "ping",
            Self::Error { .. } => "error",
            Self::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessageStart {
    pub id: String,
    pub role: Role,
    pub model: String,

    /// Always empty at stream start; blocks arrive through deltas.
    #[serde(default)]
    pub content: Vec<Content>,

    #[serde(default)]
    pub usage: Usage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

/// Delta payloads inside `content_block_delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },

    /// Partial JSON fragment of a tool's input; concatenate fragments to
    /// build the full arguments object.
    InputJsonDelta { partial_json: String },

    ThinkingDelta { thinking: String },

    SignatureDelta { signature: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_basic_request() {
        let request = MessagesRequest {
            model: "claude-3-5-haiku-latest".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageBody::Blocks(vec![Content::Text {
                    text: "Hello, Claude!".to_string(),
                }]),
            }],
            max_tokens: 1000,
            system: Some("You are a helpful assistant.".to_string()),
            temperature: Some(0.7),
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: Some(false),
            metadata: None,
            tools: None,
            tool_choice: None,
        };

        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "claude-3-5-haiku-latest");
        assert_eq!(json["max_tokens"], 1000);
        assert_eq!(json["system"], "You are a helpful assistant.");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert!(json.get("top_p").is_none());
    }

    #[test]
    fn message_body_accepts_bare_string() {
        let message: Message = serde_json::from_value(json!({
            "role": "user",
            "content": "just a string"
        }))
        .unwrap();

        assert!(matches!(message.content, MessageBody::Text(ref t) if t == "just a string"));
    }

    #[test]
    fn deserialize_tool_use_response() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_123",
            "type": "message",
            "role": "assistant",
            "content": [
                { "type": "text", "text": "I'll check the weather for you." },
                {
                    "type": "tool_use",
                    "id": "toolu_456",
                    "name": "get_weather",
                    "input": { "location": "San Francisco, CA" }
                }
            ],
            "model": "claude-3-5-haiku-latest",
            "stop_reason": "tool_use",
            "stop_sequence": null,
            "usage": { "input_tokens": 50, "output_tokens": 30 }
        }))
        .unwrap();

        assert_eq!(response.content.len(), 2);
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));

        let Content::ToolUse { id, name, input } = &response.content[1] else {
            unreachable!("expected tool use content");
        };
        assert_eq!(id, "toolu_456");
        assert_eq!(name, "get_weather");
        assert_eq!(input["location"], "San Francisco, CA");
    }

    #[test]
    fn deserialize_thinking_block() {
        let content: Content = serde_json::from_value(json!({
            "type": "thinking",
            "thinking": "The user wants a one-word answer...",
            "signature": "abc123"
        }))
        .unwrap();

        let Content::Thinking { thinking, signature } = content else {
            unreachable!("expected thinking block");
        };
        assert_eq!(thinking, "The user wants a one-word answer...");
        assert_eq!(signature.as_deref(), Some("abc123"));
    }

    #[test]
    fn unknown_content_block_is_preserved() {
        let content: Content = serde_json::from_value(json!({
            "type": "server_tool_use",
            "id": "srvtoolu_1",
            "name": "web_search"
        }))
        .unwrap();

        assert!(matches!(content, Content::Unknown(_)));
    }

    #[test]
    fn stream_event_names_match_wire_names() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": "Hi" }
        }))
        .unwrap();
        assert_eq!(event.event_name(), "content_block_delta");

        let event: StreamEvent = serde_json::from_value(json!({ "type": "ping" })).unwrap();
        assert_eq!(event.event_name(), "ping");

        let event: StreamEvent = serde_json::from_value(json!({
            "type": "message_delta",
            "delta": { "stop_reason": "end_turn", "stop_sequence": null },
            "usage": { "output_tokens": 15 }
        }))
        .unwrap();
        let StreamEvent::MessageDelta { delta, usage } = event else {
            unreachable!("expected message_delta");
        };
        assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(usage.unwrap().output_tokens, 15);
    }

    #[test]
    fn thinking_delta_round_trip() {
        let delta: ContentDelta = serde_json::from_value(json!({
            "type": "thinking_delta",
            "thinking": "hmm"
        }))
        .unwrap();
        assert!(matches!(delta, ContentDelta::ThinkingDelta { ref thinking } if thinking == "hmm"));

        let encoded = serde_json::to_value(&delta).unwrap();
        assert_eq!(encoded["type"], "thinking_delta");
    }

    #[test]
    fn deserialize_stream_error_event() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "error",
            "error": { "type": "overloaded_error", "message": "Overloaded" }
        }))
        .unwrap();

        let StreamEvent::Error { error } = event else {
            unreachable!("expected error event");
        };
        assert_eq!(error.error_type, "overloaded_error");
    }
}
