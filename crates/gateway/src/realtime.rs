//! Bidirectional realtime sessions over WebSockets.
//!
//! The envelope is a single tagged union covering the client-to-server
//! control surface (session configuration, item create/delete, input-audio
//! append/commit/clear, response create/cancel) and its server-to-client
//! counterparts. Providers expose a small capability trait; the session
//! itself is bytes-in bytes-out with FIFO ordering per direction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use crate::error::{GatewayError, Result};
use crate::messages::canonical::ProviderId;
use crate::request::RequestContext;

pub(crate) mod openai;

/// Canonical realtime event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    // Client → server.
    SessionUpdate { session: Value },
    ItemCreate { item: Value },
    ItemDelete { item_id: String },
    InputAudioAppend { audio: String },
    InputAudioCommit,
    InputAudioClear,
    ResponseCreate { response: Option<Value> },
    ResponseCancel { response_id: Option<String> },

    // Server → client.
    SessionCreated { session: Value },
    SessionUpdated { session: Value },
    ItemCreated { item: Value },
    ItemDeleted { item_id: String },
    InputAudioCommitted { item_id: String },
    InputAudioCleared,
    ResponseCreated { response: Value },
    ResponseDone { response: Value },
    Error { error: Value },

    /// Provider events with no canonical counterpart, passed through.
    #[serde(untagged)]
    Other(Value),
}

/// Realtime capability of a provider.
pub trait RealtimeProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn supports_realtime(&self) -> bool {
        false
    }

    /// WebSocket URL for the given key and model.
    fn realtime_url(&self, key: &SecretString, model: &str) -> String;

    /// Connection headers for the given key.
    fn realtime_headers(&self, key: &SecretString) -> Vec<(String, String)>;

    /// Decode one provider frame into the canonical envelope.
    fn to_canonical(&self, raw: &str) -> Result<RealtimeEvent>;

    /// Encode one canonical event as a provider frame.
    fn to_provider(&self, event: &RealtimeEvent) -> Result<String>;

    /// Key to use when the request context does not carry one.
    fn configured_key(&self) -> Option<&SecretString> {
        None
    }
}

/// One live realtime connection.
///
/// The driver owns one session per key+model pair. Events are delivered
/// FIFO in each direction; the WebSocket closes when the session is dropped,
/// the peer closes, or the originating context is cancelled.
pub struct RealtimeSession {
    outbound: mpsc::Sender<RealtimeEvent>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Result<RealtimeEvent>>>,
    closed: Arc<AtomicBool>,
}

const REALTIME_CHANNEL_CAPACITY: usize = 64;

impl RealtimeSession {
    /// Connect to the provider's realtime endpoint and start both pumps.
    pub(crate) async fn connect(
        provider: Arc<dyn RealtimeProvider>,
        model: &str,
        ctx: &RequestContext,
    ) -> Result<Self> {
        let id = provider.id();

        if !provider.supports_realtime() {
            return Err(GatewayError::UnsupportedOperation {
                provider: id,
                operation: "realtime",
            });
        }

        let key = ctx
            .api_key
            .as_ref()
            .or_else(|| provider.configured_key())
            .ok_or_else(|| GatewayError::ProviderApi {
                provider: id,
                status: 401,
                error_type: Some("authentication_error".to_string()),
                message: "no API key supplied for realtime session".to_string(),
                param: None,
            })?;

        let url = provider.realtime_url(key, model);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| GatewayError::transport(id, e))?;

        for (name, value) in provider.realtime_headers(key) {
            let name: http::HeaderName = name.parse().map_err(|e| GatewayError::transport(id, e))?;
            let value: http::HeaderValue = value.parse().map_err(|e| GatewayError::transport(id, e))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _) = connect_async(request).await.map_err(|e| GatewayError::transport(id, e))?;
        let (mut sink, mut source) = socket.split();

        let closed = Arc::new(AtomicBool::new(false));

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<RealtimeEvent>(REALTIME_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Result<RealtimeEvent>>(REALTIME_CHANNEL_CAPACITY);

        // Outbound pump: canonical events → provider frames, FIFO.
        let out_provider = provider.clone();
        let out_closed = closed.clone();
        let out_cancel = ctx.cancellation.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = out_cancel.cancelled() => break,
                    event = outbound_rx.recv() => event,
                };

                let Some(event) = event else {
                    break;
                };

                let frame = match out_provider.to_provider(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("Failed to encode realtime event for {}: {e}", out_provider.id());
                        continue;
                    }
                };

                if sink.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }

            let _ = sink.close().await;
            out_closed.store(true, Ordering::Release);
        });

        // Inbound pump: provider frames → canonical events, FIFO.
        let in_provider = provider;
        let in_closed = closed.clone();
        let in_cancel = ctx.cancellation.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = in_cancel.cancelled() => break,
                    message = source.next() => message,
                };

                let Some(message) = message else {
                    break;
                };

                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };

                let item = in_provider.to_canonical(&text);
                if inbound_tx.send(item).await.is_err() {
                    break;
                }
            }

            in_closed.store(true, Ordering::Release);
        });

        Ok(Self {
            outbound: outbound_tx,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            closed,
        })
    }

    /// Queue one event toward the provider.
    pub async fn send(&self, event: RealtimeEvent) -> Result<()> {
        self.outbound.send(event).await.map_err(|_| GatewayError::Cancelled)
    }

    /// Receive the next server event. `None` means the session is over.
    pub async fn recv(&self) -> Option<Result<RealtimeEvent>> {
        self.inbound.lock().await.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_events_round_trip_through_serde() {
        let events = vec![
            RealtimeEvent::SessionUpdate {
                session: json!({ "voice": "alloy" }),
            },
            RealtimeEvent::InputAudioAppend { audio: "AAAA".into() },
            RealtimeEvent::InputAudioCommit,
            RealtimeEvent::ResponseCancel { response_id: None },
            RealtimeEvent::ItemDeleted {
                item_id: "item_1".into(),
            },
        ];

        for event in events {
            let encoded = serde_json::to_string(&event).unwrap();
            let decoded: RealtimeEvent = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn unknown_event_is_preserved() {
        let decoded: RealtimeEvent = serde_json::from_value(json!({
            "type": "rate_limits.updated",
            "rate_limits": []
        }))
        .unwrap();

        assert!(matches!(decoded, RealtimeEvent::Other(_)));
    }
}
