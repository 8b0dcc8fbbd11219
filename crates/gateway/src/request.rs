//! Per-call request context.

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

/// Everything the driver needs from the caller for one operation.
///
/// Key material travels here rather than in long-lived provider state so
/// credential rotation never requires rebuilding the gateway. The
/// cancellation token aborts I/O: before send it fails fast with
/// `Cancelled`, mid-flight it tears down the connection, and on a stream it
/// closes the chunk channel.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// API key for this call. Falls back to the provider configuration when
    /// absent.
    pub api_key: Option<SecretString>,

    /// Extra headers merged into the outgoing request last.
    pub extra_headers: Vec<(String, String)>,

    /// Cooperative cancellation for this call.
    pub cancellation: CancellationToken,

    /// Capture the raw provider body on responses for debugging.
    pub capture_raw: bool,
}

impl RequestContext {
    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(SecretString::from(key.into())),
            ..Default::default()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
