use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{Result, SyncError};
use super::room::{InitialData, LabelMap, Room, RoomUpdate};
use crate::infrastructure::clock::now_ms;
use crate::messaging::MessageKind;

/// Length of the URL-safe token produced by [`generate_message_id`].
const MESSAGE_ID_LEN: usize = 16;

/// A frame on the wire, and on the cross-tab channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: i64,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

impl Envelope {
    /// Stamps a fresh message id and the current time.
    pub fn new(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: now_ms() as i64,
            message_id: generate_message_id(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn ping() -> Self {
        Self::new(MessageKind::Ping, serde_json::Value::Null)
    }

    pub fn disconnect() -> Self {
        Self::new(MessageKind::Disconnect, serde_json::Value::Null)
    }

    pub fn subscribe_hotel(hotel_id: &str) -> Self {
        Self::new(
            MessageKind::SubscribeHotel,
            serde_json::json!({ "hotelId": hotel_id }),
        )
    }

    pub fn room_update(update: &RoomUpdate) -> Result<Self> {
        Ok(Self::new(
            MessageKind::RoomUpdate,
            serde_json::to_value(update)?,
        ))
    }

    pub fn room_updates(updates: &[RoomUpdate]) -> Result<Self> {
        Ok(Self::new(
            MessageKind::RoomUpdate,
            serde_json::to_value(updates)?,
        ))
    }

    pub fn initial_data(rooms: Vec<Room>, labels: LabelMap) -> Result<Self> {
        Ok(Self::new(
            MessageKind::InitialData,
            serde_json::to_value(InitialData { rooms, labels })?,
        ))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            MessageKind::Error,
            serde_json::Value::String(message.into()),
        )
    }

    /// Serializes the envelope, refusing anything larger than `max_size` bytes.
    pub fn encode(&self, max_size: usize) -> Result<String> {
        let json = serde_json::to_string(self)?;
        if json.len() > max_size {
            return Err(SyncError::FrameTooLarge {
                size: json.len(),
                max: max_size,
            });
        }
        Ok(json)
    }
}

/// Produces a short id from a hash of the current time and random bits.
///
/// Collisions are possible in principle; the in-flight window is small enough that it does not
/// matter in practice.
pub fn generate_message_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let salt: u64 = rand::random();

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(salt.to_le_bytes());
    let mut id = URL_SAFE_NO_PAD.encode(hasher.finalize());
    id.truncate(MESSAGE_ID_LEN);
    id
}
