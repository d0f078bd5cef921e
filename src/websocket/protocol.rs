use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WebSocketError;
use crate::websocket::ConnectionId;

/// WebRTC negotiation message kinds. Their payloads are never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        }
    }
}

/// Inbound signaling payload: an opaque blob plus an optional target.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignalEnvelope {
    pub data: Value,
    #[serde(default)]
    pub to: Option<ConnectionId>,
}

/// Outbound signaling payload, stamped with the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedSignal {
    pub data: Value,
    pub from: ConnectionId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Message { text: Value },
    Next,
    Ready,
    Signal(SignalKind, SignalEnvelope),
    Reaction { emoji: Value },
    Ping,
}

#[derive(Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct TextPayload {
    text: Value,
}

#[derive(Deserialize)]
struct ReactionPayload {
    emoji: Value,
}

impl ClientMessage {
    /// Parses a `{"type": ..., "payload": ...}` text frame. Payloads of
    /// events that carry none (`next`, `ready`, `ping`) are ignored. Chat text
    /// is kept as raw JSON so that content checks happen in the relay.
    pub fn parse(text: &str) -> Result<Self, WebSocketError> {
        let frame: Frame = serde_json::from_str(text)
            .map_err(|e| WebSocketError::InvalidFormat(e.to_string()))?;

        let msg = match frame.kind.as_str() {
            "message" => {
                let TextPayload { text } = from_payload(frame.payload)?;
                ClientMessage::Message { text }
            }
            "next" => ClientMessage::Next,
            "ready" => ClientMessage::Ready,
            "ping" => ClientMessage::Ping,
            "offer" => ClientMessage::Signal(SignalKind::Offer, from_payload(frame.payload)?),
            "answer" => ClientMessage::Signal(SignalKind::Answer, from_payload(frame.payload)?),
            "candidate" => ClientMessage::Signal(SignalKind::Candidate, from_payload(frame.payload)?),
            "reaction" => {
                let ReactionPayload { emoji } = from_payload(frame.payload)?;
                ClientMessage::Reaction { emoji }
            }
            other => {
                return Err(WebSocketError::InvalidFormat(format!("unknown event type `{}`", other)));
            }
        };
        Ok(msg)
    }
}

fn from_payload<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, WebSocketError> {
    serde_json::from_value(payload).map_err(|e| WebSocketError::InvalidFormat(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "matched")]
    Matched {
        #[serde(rename = "partnerId")]
        partner_id: ConnectionId,
        initiator: bool,
    },
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "message")]
    Message { text: String },
    #[serde(rename = "offer")]
    Offer(RelayedSignal),
    #[serde(rename = "answer")]
    Answer(RelayedSignal),
    #[serde(rename = "candidate")]
    Candidate(RelayedSignal),
    #[serde(rename = "reaction")]
    Reaction { emoji: String },
    #[serde(rename = "partnerDisconnected")]
    PartnerDisconnected,
    #[serde(rename = "system_error")]
    SystemError { message: String },
    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    pub fn signal(kind: SignalKind, data: Value, from: ConnectionId) -> Self {
        let signal = RelayedSignal { data, from };
        match kind {
            SignalKind::Offer => ServerMessage::Offer(signal),
            SignalKind::Answer => ServerMessage::Answer(signal),
            SignalKind::Candidate => ServerMessage::Candidate(signal),
        }
    }

    pub fn system_error(message: impl Into<String>) -> Self {
        ServerMessage::SystemError { message: message.into() }
    }
}
