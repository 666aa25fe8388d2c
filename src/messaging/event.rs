use crate::types::constants::message_kinds;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The closed set of message kinds understood on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Full room list and label mapping
    InitialData,

    /// One room change, or a batch of them
    RoomUpdate,

    /// Keep-alive ping, never surfaced to subscribers
    Ping,

    /// Tenant announcement, sent once per connection
    SubscribeHotel,

    /// Polite close notice
    Disconnect,

    /// Server-side error message
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        Self::InitialData,
        Self::RoomUpdate,
        Self::Ping,
        Self::SubscribeHotel,
        Self::Disconnect,
        Self::Error,
    ];

    /// Parse a wire string, `None` for anything outside the recognized set
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            message_kinds::INITIAL_DATA => Some(Self::InitialData),
            message_kinds::ROOM_UPDATE => Some(Self::RoomUpdate),
            message_kinds::PING => Some(Self::Ping),
            message_kinds::SUBSCRIBE_HOTEL => Some(Self::SubscribeHotel),
            message_kinds::DISCONNECT => Some(Self::Disconnect),
            message_kinds::ERROR => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert kind to its wire string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialData => message_kinds::INITIAL_DATA,
            Self::RoomUpdate => message_kinds::ROOM_UPDATE,
            Self::Ping => message_kinds::PING,
            Self::SubscribeHotel => message_kinds::SUBSCRIBE_HOTEL,
            Self::Disconnect => message_kinds::DISCONNECT,
            Self::Error => message_kinds::ERROR,
        }
    }

    /// Whether an unacknowledged send of this kind is worth replaying after a reconnect
    pub fn is_replayable(&self) -> bool {
        matches!(self, Self::RoomUpdate)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown message type `{}`", s)))
    }
}
