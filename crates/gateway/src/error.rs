use thiserror::Error;

use crate::messages::canonical::ProviderId;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Canonical error taxonomy for every gateway operation.
///
/// Errors are classified by kind rather than by provider: the same variant is
/// produced whether the upstream was Anthropic, OpenAI, or a local Ollama
/// daemon. Provider-originated failures carry the provider tag so callers
/// (and fallback routers above this layer) can attribute them.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network or transport failure before a structured provider response was
    /// received: connection reset, DNS failure, TLS handshake, I/O timeout.
    #[error("request to {provider} failed: {message}")]
    ProviderRequestFailed { provider: ProviderId, message: String },

    /// The provider returned a non-2xx status with a structured (or at least
    /// textual) error payload.
    #[error("{provider} returned {status}: {message}")]
    ProviderApi {
        provider: ProviderId,
        status: u16,
        /// Provider error type string, e.g. `invalid_request_error`.
        error_type: Option<String>,
        message: String,
        /// Offending parameter name, when the provider reports one.
        param: Option<String>,
    },

    /// Failed to serialize an outgoing body. Always an implementation bug.
    #[error("failed to encode request body: {0}")]
    JsonEncode(String),

    /// Failed to deserialize a provider payload that claimed success.
    /// Always an implementation bug or a provider contract break.
    #[error("failed to decode response body: {0}")]
    JsonDecode(String),

    /// The provider does not implement the requested operation, e.g.
    /// embeddings on Anthropic.
    #[error("{provider} does not support {operation}")]
    UnsupportedOperation {
        provider: ProviderId,
        operation: &'static str,
    },

    /// The provider configuration forbids the requested operation.
    #[error("{operation} is disallowed for {provider} by configuration")]
    OperationDisallowed {
        provider: ProviderId,
        operation: &'static str,
    },

    /// The caller's context was cancelled before or during the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A single upstream stream event could not be decoded. Recoverable: the
    /// event is skipped and the stream continues.
    #[error("failed to parse stream event: {message}")]
    StreamParse { message: String },

    /// The provider emitted a terminal error event on an open stream. The
    /// channel closes after delivering this error.
    #[error("{provider} stream error: {message}")]
    StreamTerminal {
        provider: ProviderId,
        error_type: Option<String>,
        message: String,
    },
}

impl GatewayError {
    /// True only for internal invariant violations (encode/decode failures);
    /// everything else originates from the provider or the caller.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::JsonEncode(_) | Self::JsonDecode(_))
    }

    /// The provider this error is attributed to, when known.
    pub fn provider(&self) -> Option<ProviderId> {
        match self {
            Self::ProviderRequestFailed { provider, .. }
            | Self::ProviderApi { provider, .. }
            | Self::UnsupportedOperation { provider, .. }
            | Self::OperationDisallowed { provider, .. }
            | Self::StreamTerminal { provider, .. } => Some(*provider),
            _ => None,
        }
    }

    /// HTTP status attached to the error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ProviderApi { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn encode(provider: ProviderId, source: impl std::fmt::Display) -> Self {
        log::error!("Failed to encode request for {provider}: {source}");
        Self::JsonEncode(source.to_string())
    }

    pub(crate) fn decode(provider: ProviderId, source: impl std::fmt::Display) -> Self {
        log::error!("Failed to decode response from {provider}: {source}");
        Self::JsonDecode(source.to_string())
    }

    pub(crate) fn transport(provider: ProviderId, source: impl std::fmt::Display) -> Self {
        Self::ProviderRequestFailed {
            provider,
            message: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_flag_only_set_for_codec_errors() {
        assert!(GatewayError::JsonEncode("oops".into()).is_internal());
        assert!(GatewayError::JsonDecode("oops".into()).is_internal());

        let api = GatewayError::ProviderApi {
            provider: ProviderId::Anthropic,
            status: 429,
            error_type: Some("rate_limit_error".into()),
            message: "slow down".into(),
            param: None,
        };
        assert!(!api.is_internal());
        assert!(!GatewayError::Cancelled.is_internal());
    }

    #[test]
    fn provider_attribution() {
        let err = GatewayError::UnsupportedOperation {
            provider: ProviderId::Anthropic,
            operation: "embeddings",
        };
        assert_eq!(err.provider(), Some(ProviderId::Anthropic));
        assert_eq!(GatewayError::Cancelled.provider(), None);
    }
}
