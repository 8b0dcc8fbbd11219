//! Provider configuration types for the gateway.
//!
//! These are pure data types: loading them from files or the environment is
//! the caller's concern. Secret key material is wrapped in
//! [`secrecy::SecretString`] so it never appears in debug output or logs.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;

/// Configuration for an HTTP API provider (Anthropic, OpenAI, Google, ...).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ApiProviderConfig {
    /// API key for authentication.
    ///
    /// A key supplied on the request context takes precedence over this one,
    /// so credential rotation does not require rebuilding the gateway.
    pub api_key: Option<SecretString>,

    /// Custom base URL for the provider API.
    pub base_url: Option<String>,

    /// Maximum number of concurrent in-flight requests to this provider.
    ///
    /// Bounds the synchronous HTTP client's per-host connection pool.
    pub max_concurrency: Option<usize>,

    /// Request timeout in seconds. Applies to both the synchronous and the
    /// streaming client.
    pub timeout_secs: Option<u64>,

    /// Extra headers sent with every request to this provider.
    ///
    /// Merged after the typed headers, so a configured value can override the
    /// defaults (but not the authentication header the caller supplied).
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,

    /// Operations this provider is not allowed to perform, e.g. a custom
    /// deployment that must never receive embeddings traffic.
    #[serde(default)]
    pub disallowed_operations: Vec<Operation>,
}

/// Configuration for AWS Bedrock.
///
/// Bedrock authenticates with SigV4 through the AWS SDK rather than an API
/// key header, so its configuration differs from the HTTP providers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct BedrockProviderConfig {
    /// AWS region, e.g. `us-east-1`.
    pub region: String,

    /// Explicit access key. When absent the SDK falls back to its default
    /// credential chain (environment, profile, instance metadata).
    pub access_key_id: Option<SecretString>,

    /// Explicit secret key, paired with `access_key_id`.
    pub secret_access_key: Option<SecretString>,

    /// Optional session token for temporary credentials.
    pub session_token: Option<SecretString>,

    /// Named AWS profile to load credentials from.
    pub profile: Option<String>,

    /// Custom endpoint URL, used for testing against local stacks.
    pub base_url: Option<String>,
}

/// Per-provider configuration, keyed by provider tag on the gateway side.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    /// AWS Bedrock. Listed first so the `region` field disambiguates the
    /// untagged decode.
    Bedrock(BedrockProviderConfig),

    /// Plain HTTP API provider.
    Api(ApiProviderConfig),
}

/// Gateway operations that a provider configuration may forbid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Chat,
    ChatStream,
    TextCompletion,
    Embeddings,
    Realtime,
}

impl ApiProviderConfig {
    /// Whether this configuration forbids the given operation.
    pub fn disallows(&self, operation: Operation) -> bool {
        self.disallowed_operations.contains(&operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_provider_config_from_json() {
        let config: ApiProviderConfig = serde_json::from_str(
            r#"{
                "api_key": "sk-test",
                "base_url": "http://localhost:8080/v1",
                "max_concurrency": 32,
                "extra_headers": { "x-team": "search" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(config.max_concurrency, Some(32));
        assert_eq!(config.extra_headers.get("x-team").map(String::as_str), Some("search"));
        assert!(config.api_key.is_some());
    }

    #[test]
    fn provider_config_untagged_selects_bedrock_on_region() {
        let config: ProviderConfig = serde_json::from_str(r#"{ "region": "eu-west-1" }"#).unwrap();
        assert!(matches!(config, ProviderConfig::Bedrock(ref c) if c.region == "eu-west-1"));

        let config: ProviderConfig = serde_json::from_str(r#"{ "base_url": "http://localhost" }"#).unwrap();
        assert!(matches!(config, ProviderConfig::Api(_)));
    }

    #[test]
    fn disallowed_operations_round_trip() {
        let config: ApiProviderConfig =
            serde_json::from_str(r#"{ "disallowed_operations": ["embeddings", "chat_stream"] }"#).unwrap();

        assert!(config.disallows(Operation::Embeddings));
        assert!(config.disallows(Operation::ChatStream));
        assert!(!config.disallows(Operation::Chat));
    }

    #[test]
    fn secret_key_is_redacted_in_debug_output() {
        let config: ApiProviderConfig = serde_json::from_str(r#"{ "api_key": "sk-secret" }"#).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
    }
}
