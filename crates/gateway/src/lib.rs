//! Multi-provider LLM gateway core.
//!
//! A unifying runtime that accepts requests in one canonical representation
//! and dispatches them to upstream chat, completion, and embedding providers,
//! translating wire formats and streaming protocols in both directions:
//!
//! - [`messages::canonical`]: the provider-agnostic request/response/chunk
//!   model, including tool calling, multimodal content, reasoning, and the
//!   Responses superset;
//! - [`messages::anthropic`] / [`messages::openai`]: provider wire formats,
//!   each defined once and shared by the outbound drivers and the inbound
//!   dialect paths;
//! - [`provider`]: the driver, with per-provider converters, HTTP/SSE
//!   plumbing, retries, bounded streaming channels, and post-hooks;
//! - [`realtime`]: the WebSocket envelope for bidirectional audio/text
//!   sessions;
//! - [`pool`]: lease-based object pools for hot allocations.
//!
//! HTTP frontends, configuration loading, and fallback routing live above
//! this crate and only interact with it through [`provider::Gateway`].

mod error;
pub mod hooks;
pub mod media;
pub mod messages;
pub mod pool;
pub mod provider;
pub mod realtime;
mod request;

pub use error::{GatewayError, Result};
pub use messages::canonical;
pub use provider::{ChatStream, Gateway, GatewayBuilder, Provider};
pub use request::RequestContext;
