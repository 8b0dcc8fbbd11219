//! Provider-agnostic canonical types for LLM interactions.
//!
//! Every operation the gateway performs (chat, text completion, embeddings,
//! the Responses superset, streaming) is expressed in the types of this
//! module. Providers convert between these types and their native wire
//! formats; nothing outside the converter modules ever sees a provider
//! payload.
//!
//! ## Conversion flow
//!
//! ```text
//! Dialect request → canonical request → provider wire → canonical response → dialect response
//! ```
//!
//! ## Key decisions
//!
//! - **Content containers** are sum types: a message body is either a plain
//!   string or an ordered block list, never both. The untagged serde encoding
//!   tries the string shape first, then the array shape.
//! - **Tool-call arguments are a JSON string.** Providers that hand back
//!   structured input get it JSON-encoded on the way in; providers that want
//!   structured input get the string parsed on the way out, falling back to
//!   the literal text when it is not valid JSON.
//! - **Reasoning text survives.** Thinking blocks map to the `thought` field
//!   on the assistant extension and are round-tripped, never dropped.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) mod from_anthropic;
pub(crate) mod from_openai;
pub mod responses_api;
pub mod to_anthropic;
pub mod to_openai;

mod params;

pub use params::{ChatParameters, merge_extras};

/// Current Unix timestamp in seconds, used to stamp `created` on responses
/// from providers that do not report one.
pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Upstream backend tag, used both for dispatch and for attribution on
/// responses and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Vertex,
    Bedrock,
    Cohere,
    Mistral,
    Ollama,
    Replicate,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Vertex => "vertex",
            Self::Bedrock => "bedrock",
            Self::Cohere => "cohere",
            Self::Mistral => "mistral",
            Self::Ollama => "ollama",
            Self::Replicate => "replicate",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "vertex" => Ok(Self::Vertex),
            "bedrock" => Ok(Self::Bedrock),
            "cohere" => Ok(Self::Cohere),
            "mistral" => Ok(Self::Mistral),
            "ollama" => Ok(Self::Ollama),
            "replicate" => Ok(Self::Replicate),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Canonical chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Target provider for this request.
    pub provider: ProviderId,

    /// Model identifier in the provider's namespace, e.g.
    /// `claude-3-5-haiku-latest` or `gpt-4o`.
    pub model: String,

    /// Ordered conversation. System messages are extracted into the
    /// provider's native position by the converters.
    pub messages: Vec<ChatMessage>,

    /// Sampling and tooling parameters. Absent parameters take provider
    /// defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ChatParameters>,

    /// Providers to try next if this one fails terminally. Consumed by the
    /// fallback router above the driver; the driver itself ignores it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<Vec<Fallback>>,

    /// Raw body passthrough: when set, the driver sends these bytes verbatim
    /// instead of encoding the typed request.
    #[serde(skip)]
    pub raw_body: Option<Vec<u8>>,
}

impl ChatRequest {
    pub fn new(provider: ProviderId, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            messages: Vec::new(),
            params: None,
            fallbacks: None,
            raw_body: None,
        }
    }
}

/// Fallback target for the router above the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fallback {
    pub provider: ProviderId,
    pub model: String,
}

/// Message sender role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
    /// OpenAI's replacement for `system` on newer models. Converters treat it
    /// as a system message for providers that do not know the role.
    Developer,
    /// Any role not yet known, preserved verbatim.
    #[serde(untagged)]
    Other(String),
}

/// One message in a conversation.
///
/// `tool_calls` and `thought` form the assistant extension; `tool_call_id`
/// forms the tool extension (the call a tool-role message is answering).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,

    /// Message body. `None` encodes as JSON `null`.
    pub content: Option<MessageContent>,

    /// Tool invocations requested by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Model reasoning ("thinking") text. Round-tripped, never dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,

    /// For tool-role messages: the tool call this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Default for ChatRole {
    fn default() -> Self {
        Self::User
    }
}

impl ChatMessage {
    /// Plain-text message with the given role.
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: None,
            thought: None,
            tool_call_id: None,
        }
    }

    /// Flattened text of the message body, joining text blocks in order.
    pub fn text_content(&self) -> Option<String> {
        match &self.content {
            Some(MessageContent::Text(text)) => Some(text.clone()),
            Some(MessageContent::Blocks(blocks)) => {
                let joined: Vec<&str> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if joined.is_empty() { None } else { Some(joined.join("")) }
            }
            None => None,
        }
    }
}

/// Message body: a plain string or an ordered list of content blocks.
///
/// Exactly one shape exists by construction. Decoding tries the string shape
/// first, then the block array; an absent body is `Option::None` on the
/// message and encodes as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One unit of multimodal content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },

    /// Image reference: a remote URL or a base64 `data:` URI. Media type is
    /// derived by [`crate::media::extract_url_type_info`].
    Image {
        url: String,
    },

    /// Base64 audio input with its container format, e.g. `wav`.
    InputAudio {
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },

    /// Assistant refusal text.
    Refusal {
        refusal: String,
    },
}

/// Structured invocation of a tool by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned identifier, e.g. `toolu_…` or `call_…`.
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ToolCallKind,

    pub function: FunctionCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    #[default]
    Function,
}

/// Function name plus its arguments.
///
/// `arguments` is always a JSON string across the canonical boundary. Use
/// [`FunctionCall::parsed_arguments`] for the structured view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl FunctionCall {
    /// Parse the arguments string. Invalid JSON falls back to the literal
    /// text as a JSON string, so downstream encoders never fail on model
    /// output.
    pub fn parsed_arguments(&self) -> Value {
        if self.arguments.is_empty() {
            return Value::Object(serde_json::Map::new());
        }
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| Value::String(self.arguments.clone()))
    }

    /// Canonicalize structured provider input into the arguments string.
    pub fn arguments_from_value(input: &Value) -> String {
        serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Tool made available to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type", default)]
    pub kind: ToolCallKind,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments object.
    pub parameters: Value,

    /// OpenAI strict-mode flag; ignored by providers that lack it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// How the model may use the available tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    /// Force a specific function by name.
    Function { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
    /// Tools disabled for this turn.
    None,
    /// Model decides.
    Auto,
    /// Model must call at least one tool. `any` on Anthropic/Bedrock.
    #[serde(alias = "any")]
    Required,
}

/// Why generation stopped. The canonical vocabulary; per-provider forward
/// and reverse maps live next to this enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    FunctionCall,
    /// Unrecognized provider reason, passed through verbatim.
    #[serde(untagged)]
    Other(String),
}

impl FinishReason {
    /// Forward map from an Anthropic `stop_reason`. This table is
    /// authoritative: `end_turn`/`stop_sequence` → stop, `max_tokens` →
    /// length, `tool_use` → tool_calls, anything else passes through.
    pub fn from_anthropic(raw: &str) -> Self {
        match raw {
            "end_turn" | "stop_sequence" => Self::Stop,
            "max_tokens" => Self::Length,
            "tool_use" => Self::ToolCalls,
            "refusal" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }

    /// Reverse map to an Anthropic `stop_reason`. Where several provider
    /// reasons share a canonical image, the preimage is fixed: `stop` maps
    /// back to `end_turn`.
    pub fn as_anthropic(&self) -> &str {
        match self {
            Self::Stop => "end_turn",
            Self::Length => "max_tokens",
            Self::ToolCalls | Self::FunctionCall => "tool_use",
            Self::ContentFilter => "refusal",
            Self::Other(raw) => raw,
        }
    }

    /// Forward map from an OpenAI-shaped `finish_reason`; the canonical
    /// vocabulary is OpenAI's, so this is nearly the identity.
    pub fn from_openai(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            "function_call" => Self::FunctionCall,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_openai(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::FunctionCall => "function_call",
            Self::Other(raw) => raw,
        }
    }

    /// Forward map from a Gemini candidate `finishReason`.
    pub fn from_google(raw: &str) -> Self {
        match raw {
            "STOP" => Self::Stop,
            "MAX_TOKENS" => Self::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_google(&self) -> &str {
        match self {
            Self::Stop | Self::ToolCalls | Self::FunctionCall => "STOP",
            Self::Length => "MAX_TOKENS",
            Self::ContentFilter => "SAFETY",
            Self::Other(raw) => raw,
        }
    }

    /// Forward map from a Cohere v2 `finish_reason`.
    pub fn from_cohere(raw: &str) -> Self {
        match raw {
            "COMPLETE" | "STOP_SEQUENCE" => Self::Stop,
            "MAX_TOKENS" => Self::Length,
            "TOOL_CALL" => Self::ToolCalls,
            "ERROR" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_cohere(&self) -> &str {
        match self {
            Self::Stop => "COMPLETE",
            Self::Length => "MAX_TOKENS",
            Self::ToolCalls | Self::FunctionCall => "TOOL_CALL",
            Self::ContentFilter => "ERROR",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_openai())
    }
}

/// Token accounting for a request/response pair.
///
/// When present on input this is forwarded untouched; the driver only ever
/// synthesizes `total_tokens` from the parts when the provider omits it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_details: Option<PromptTokenDetails>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_details: Option<CompletionTokenDetails>,
}

impl Usage {
    /// Synthesize the total from the parts when the provider left it at zero.
    pub fn fill_total(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self.prompt_tokens + self.completion_tokens;
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTokenDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionTokenDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u32>,
}

/// Canonical chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub provider: ProviderId,
    pub choices: Vec<ChatChoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Unix timestamp (seconds).
    pub created: u64,

    #[serde(default, skip_serializing_if = "ResponseExtras::is_empty")]
    pub extras: ResponseExtras,
}

/// Per-provider extras attached to a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseExtras {
    /// Raw provider body, captured when debugging is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,

    /// Effective parameters echoed back after provider filtering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ChatParameters>,

    /// Stop sequence that triggered completion, when the provider reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

impl ResponseExtras {
    fn is_empty(&self) -> bool {
        self.raw.is_none() && self.params.is_none() && self.stop_sequence.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<FinishReason>,
}

/// One incremental update on a streaming chat.
///
/// `chunk_index` is assigned by the driver's stream pump and forms a
/// contiguous sequence starting at 0 within a single stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamChunk {
    pub id: String,
    pub model: String,
    pub provider: ProviderId,
    pub choices: Vec<StreamChoice>,

    /// Cumulative usage; usually only on (or before) the terminal chunk.
    /// Absence is legal at any point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    pub chunk_index: u64,
}

impl ChatStreamChunk {
    /// Terminal finish reason carried by this chunk, if any.
    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.choices.iter().find_map(|choice| choice.finish_reason.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: MessageDelta,
    pub finish_reason: Option<FinishReason>,
}

/// Incremental message content. The first chunk of a stream carries the
/// role; later chunks may omit it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Incremental reasoning text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Streaming tool-call updates: a head establishing ID and name, then
/// argument fragments to concatenate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCallDelta {
    Start {
        index: usize,
        id: String,
        function: FunctionStart,
    },
    Delta {
        index: usize,
        function: FunctionDelta,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionStart {
    pub name: String,
    /// Usually empty; arguments arrive through deltas.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDelta {
    pub arguments: String,
}

/// Canonical text-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCompletionRequest {
    pub provider: ProviderId,
    pub model: String,
    pub input: TextCompletionInput,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ChatParameters>,
}

/// Prompt input: a single string or an ordered batch. Exactly one shape
/// exists; decoding tries the string first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextCompletionInput {
    Single(String),
    Batch(Vec<String>),
}

impl TextCompletionInput {
    pub fn prompts(&self) -> Vec<&str> {
        match self {
            Self::Single(prompt) => vec![prompt.as_str()],
            Self::Batch(prompts) => prompts.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCompletionResponse {
    pub id: String,
    pub model: String,
    pub provider: ProviderId,
    pub choices: Vec<CompletionChoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    pub created: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

/// Canonical embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub provider: ProviderId,
    pub model: String,

    /// Ordered input texts; output vectors preserve this order.
    pub input: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub id: String,
    pub model: String,
    pub provider: ProviderId,
    pub data: Vec<Embedding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub index: u32,
    pub vector: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_content_decodes_string_before_blocks() {
        let content: MessageContent = serde_json::from_value(json!("hello")).unwrap();
        assert!(matches!(content, MessageContent::Text(ref t) if t == "hello"));

        let content: MessageContent =
            serde_json::from_value(json!([{ "type": "text", "text": "hello" }])).unwrap();
        let MessageContent::Blocks(blocks) = content else {
            unreachable!("expected blocks");
        };
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn absent_content_encodes_as_null() {
        let message = ChatMessage {
            role: ChatRole::Assistant,
            content: None,
            tool_calls: None,
            thought: None,
            tool_call_id: None,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["content"], Value::Null);
    }

    #[test]
    fn content_block_order_survives_round_trip() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Text { text: "first".into() },
            ContentBlock::Image {
                url: "https://example.com/cat.png".into(),
            },
            ContentBlock::Text { text: "second".into() },
        ]);

        let encoded = serde_json::to_string(&content).unwrap();
        let decoded: MessageContent = serde_json::from_str(&encoded).unwrap();

        let MessageContent::Blocks(blocks) = decoded else {
            unreachable!("expected blocks");
        };
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "first"));
        assert!(matches!(&blocks[1], ContentBlock::Image { .. }));
        assert!(matches!(&blocks[2], ContentBlock::Text { text } if text == "second"));
    }

    #[test]
    fn finish_reason_anthropic_bijection() {
        for reason in [
            FinishReason::Stop,
            FinishReason::Length,
            FinishReason::ToolCalls,
            FinishReason::ContentFilter,
        ] {
            assert_eq!(FinishReason::from_anthropic(reason.as_anthropic()), reason);
        }
    }

    #[test]
    fn finish_reason_openai_bijection() {
        for reason in [
            FinishReason::Stop,
            FinishReason::Length,
            FinishReason::ToolCalls,
            FinishReason::ContentFilter,
            FinishReason::FunctionCall,
        ] {
            assert_eq!(FinishReason::from_openai(reason.as_openai()), reason);
        }
    }

    #[test]
    fn anthropic_stop_reason_table() {
        assert_eq!(FinishReason::from_anthropic("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_anthropic("stop_sequence"), FinishReason::Stop);
        assert_eq!(FinishReason::from_anthropic("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::from_anthropic("tool_use"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from_anthropic("pause_turn"),
            FinishReason::Other("pause_turn".into())
        );
        // stop's reverse preimage is end_turn, not stop_sequence
        assert_eq!(FinishReason::Stop.as_anthropic(), "end_turn");
    }

    #[test]
    fn arguments_fall_back_to_literal_text() {
        let call = FunctionCall {
            name: "run".into(),
            arguments: r#"{"command": "echo "hi""}"#.into(),
        };
        let parsed = call.parsed_arguments();
        assert!(matches!(parsed, Value::String(ref s) if s == &call.arguments));

        let call = FunctionCall {
            name: "run".into(),
            arguments: String::new(),
        };
        assert_eq!(call.parsed_arguments(), json!({}));
    }

    #[test]
    fn usage_total_synthesized_only_when_missing() {
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 0,
            prompt_details: None,
            completion_details: None,
        }
        .fill_total();
        assert_eq!(usage.total_tokens, 15);

        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 99,
            prompt_details: None,
            completion_details: None,
        }
        .fill_total();
        assert_eq!(usage.total_tokens, 99);
    }

    #[test]
    fn text_completion_input_decodes_both_shapes() {
        let input: TextCompletionInput = serde_json::from_value(json!("one prompt")).unwrap();
        assert_eq!(input.prompts(), vec!["one prompt"]);

        let input: TextCompletionInput = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(input.prompts(), vec!["a", "b"]);
    }

    #[test]
    fn provider_id_round_trips_through_strings() {
        for provider in [
            ProviderId::Anthropic,
            ProviderId::OpenAi,
            ProviderId::Vertex,
            ProviderId::Bedrock,
            ProviderId::Cohere,
            ProviderId::Mistral,
            ProviderId::Ollama,
            ProviderId::Replicate,
        ] {
            let parsed: ProviderId = provider.as_str().parse().unwrap();
            assert_eq!(parsed, provider);
        }
    }
}
