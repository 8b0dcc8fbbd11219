//! OpenAI realtime event mapping.
//!
//! The canonical envelope names events `session_update`, `item_create`, …;
//! OpenAI spells them `session.update`, `conversation.item.create`, and so
//! on. Both directions are explicit tables so new server events fall through
//! to the passthrough variant instead of failing the session.

use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::realtime::RealtimeEvent;

pub(crate) fn encode_event(event: &RealtimeEvent) -> Result<String> {
    let frame = match event {
        RealtimeEvent::SessionUpdate { session } => json!({ "type": "session.update", "session": session }),
        RealtimeEvent::ItemCreate { item } => json!({ "type": "conversation.item.create", "item": item }),
        RealtimeEvent::ItemDelete { item_id } => json!({ "type": "conversation.item.delete", "item_id": item_id }),
        RealtimeEvent::InputAudioAppend { audio } => json!({ "type": "input_audio_buffer.append", "audio": audio }),
        RealtimeEvent::InputAudioCommit => json!({ "type": "input_audio_buffer.commit" }),
        RealtimeEvent::InputAudioClear => json!({ "type": "input_audio_buffer.clear" }),
        RealtimeEvent::ResponseCreate { response } => match response {
            Some(response) => json!({ "type": "response.create", "response": response }),
            None => json!({ "type": "response.create" }),
        },
        RealtimeEvent::ResponseCancel { response_id } => match response_id {
            Some(response_id) => json!({ "type": "response.cancel", "response_id": response_id }),
            None => json!({ "type": "response.cancel" }),
        },
        // Server-side events and passthrough values are sent verbatim; the
        // caller is proxying a client that already speaks the dialect.
        RealtimeEvent::Other(value) => value.clone(),
        other => {
            return serde_json::to_string(other)
                .map_err(|e| GatewayError::JsonEncode(format!("realtime event: {e}")));
        }
    };

    serde_json::to_string(&frame).map_err(|e| GatewayError::JsonEncode(format!("realtime event: {e}")))
}

pub(crate) fn decode_event(raw: &str) -> Result<RealtimeEvent> {
    let value: Value = serde_json::from_str(raw).map_err(|e| GatewayError::StreamParse {
        message: format!("realtime frame: {e}"),
    })?;

    let event_type = value.get("type").and_then(Value::as_str).unwrap_or_default();

    let event = match event_type {
        "session.created" => RealtimeEvent::SessionCreated {
            session: field(&value, "session"),
        },
        "session.updated" => RealtimeEvent::SessionUpdated {
            session: field(&value, "session"),
        },
        "conversation.item.created" => RealtimeEvent::ItemCreated {
            item: field(&value, "item"),
        },
        "conversation.item.deleted" => RealtimeEvent::ItemDeleted {
            item_id: string_field(&value, "item_id"),
        },
        "input_audio_buffer.committed" => RealtimeEvent::InputAudioCommitted {
            item_id: string_field(&value, "item_id"),
        },
        "input_audio_buffer.cleared" => RealtimeEvent::InputAudioCleared,
        "response.created" => RealtimeEvent::ResponseCreated {
            response: field(&value, "response"),
        },
        "response.done" => RealtimeEvent::ResponseDone {
            response: field(&value, "response"),
        },
        "error" => RealtimeEvent::Error {
            error: field(&value, "error"),
        },
        _ => RealtimeEvent::Other(value),
    };

    Ok(event)
}

fn field(value: &Value, name: &str) -> Value {
    value.get(name).cloned().unwrap_or(Value::Null)
}

fn string_field(value: &Value, name: &str) -> String {
    value.get(name).and_then(Value::as_str).unwrap_or_default().to_string()
}
