use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ProviderId, ToolChoice, ToolDefinition};

/// Sampling and tooling parameters for chat and text completion.
///
/// Any field a target provider does not understand is dropped by
/// [`ChatParameters::validate_and_filter_for`] before conversion; the
/// `extra` bag is merged into the encoded request last and never overwrites
/// a typed field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

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
    pub stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// End-user identifier for provider-side abuse tracking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Open-ended provider-specific keys, merged into the encoded request
    /// after all typed fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ChatParameters {
    /// Drop parameters the target provider does not support.
    ///
    /// The filter is provider-indexed and deterministic: the same input
    /// always produces the same output for a given provider.
    pub fn validate_and_filter_for(mut self, provider: ProviderId) -> Self {
        if !supports_top_k(provider) {
            self.top_k = None;
        }

        if !supports_penalties(provider) {
            self.frequency_penalty = None;
            self.presence_penalty = None;
        }

        if !supports_parallel_tool_calls(provider) {
            self.parallel_tool_calls = None;
        }

        if !supports_user_tag(provider) {
            self.user = None;
        }

        if !supports_tools(provider) {
            self.tools = None;
            self.tool_choice = None;
        }

        self
    }
}

fn supports_top_k(provider: ProviderId) -> bool {
    matches!(
        provider,
        ProviderId::Anthropic | ProviderId::Vertex | ProviderId::Cohere | ProviderId::Ollama | ProviderId::Replicate
    )
}

fn supports_penalties(provider: ProviderId) -> bool {
    matches!(
        provider,
        ProviderId::OpenAi | ProviderId::Mistral | ProviderId::Cohere | ProviderId::Ollama
    )
}

fn supports_parallel_tool_calls(provider: ProviderId) -> bool {
    matches!(provider, ProviderId::OpenAi | ProviderId::Mistral)
}

fn supports_user_tag(provider: ProviderId) -> bool {
    matches!(provider, ProviderId::OpenAi | ProviderId::Mistral)
}

fn supports_tools(provider: ProviderId) -> bool {
    !matches!(provider, ProviderId::Replicate)
}

/// Merge the `extra` bag into an encoded request object.
///
/// Keys land last, but a typed field already present on the object always
/// wins: conflicting extras are dropped silently in favor of the typed
/// value.
pub fn merge_extras(body: &mut Value, extra: &Map<String, Value>) {
    let Some(object) = body.as_object_mut() else {
        return;
    };

    for (key, value) in extra {
        if !object.contains_key(key) {
            object.insert(key.clone(), value.clone());
        }
    }
}
