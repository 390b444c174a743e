use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{CorrespondentId, DeliveryStatus, MessageId};

/// One entry of `GET /api/conversations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub wa_id: CorrespondentId,
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
}

/// One entry of `GET /api/messages/{wa_id}`, and the payload of every
/// non-keepalive WebSocket frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: MessageId,
    pub wa_id: CorrespondentId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
}

/// Body of `POST /api/send-message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub wa_id: CorrespondentId,
    pub text: String,
}

/// Classified inbound WebSocket frame.
///
/// The push channel mixes channel-management noise into the frame stream:
/// a `{"ping":"pong"}` acknowledgement and an initial `{"status":"connected"}`
/// handshake. Both are `Keepalive`; every other frame must carry a full
/// message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Keepalive,
    Message(MessagePayload),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        if is_keepalive(&value) {
            return Ok(Self::Keepalive);
        }
        serde_json::from_value(value).map(Self::Message)
    }
}

fn is_keepalive(value: &Value) -> bool {
    value.get("ping").and_then(Value::as_str) == Some("pong")
        || value.get("status").and_then(Value::as_str) == Some("connected")
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
