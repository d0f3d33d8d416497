//! Wire frames exchanged over the chat WebSocket.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Room identifier assigned by the chat service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Wall-clock seconds since the Unix epoch, as embedded in `send_timestamp`.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// =============================================================================
// Outbound
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundFrame<'a> {
    Subscribe {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    Message {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        content: &'a str,
        send_timestamp: f64,
    },
}

impl OutboundFrame<'_> {
    pub fn encode(&self) -> Result<String, sonic_rs::Error> {
        sonic_rs::to_string(self)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Room reference as delivered by the service, which stringifies ids.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireRoomId {
    Number(u64),
    Text(String),
}

impl WireRoomId {
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            WireRoomId::Number(id) => Some(RoomId(*id)),
            WireRoomId::Text(text) => text.trim().parse().ok().map(RoomId),
        }
    }
}

/// A chat message fanned out to room subscribers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "roomId", default)]
    pub room_id: Option<WireRoomId>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Present only when the message originated from this harness.
    #[serde(default)]
    pub send_timestamp: Option<f64>,
}

impl ChatMessage {
    /// Embedded send time, if the sender stamped one.
    pub fn sent_at(&self) -> Option<f64> {
        self.send_timestamp.filter(|ts| ts.is_finite() && *ts > 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundFrame {
    Message(ChatMessage),
    Welcome {
        #[serde(default)]
        user: Option<String>,
    },
    UserJoin {
        #[serde(default)]
        user: Option<String>,
    },
    UserLeave {
        #[serde(default)]
        user: Option<String>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, sonic_rs::Error> {
        sonic_rs::from_str(text)
    }
}
