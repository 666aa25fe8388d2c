use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label key → display name.
pub type LabelMap = BTreeMap<String, String>;

/// One room as the dashboard sees it.
///
/// Identity (`id`) and category (`label`) never change after the snapshot is loaded; only the
/// occupancy flags are patched by live updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub is_vacant: bool,
    #[serde(default)]
    pub is_inactive: bool,
    #[serde(default)]
    pub label: String,
    /// Milliseconds since the epoch of the last applied change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<u64>,
}

impl Room {
    pub fn new(id: impl Into<String>, label: impl Into<String>, is_vacant: bool) -> Self {
        Self {
            id: id.into(),
            is_vacant,
            is_inactive: false,
            label: label.into(),
            last_update: None,
        }
    }

    pub fn with_inactive(mut self, is_inactive: bool) -> Self {
        self.is_inactive = is_inactive;
        self
    }

    /// Applies the occupancy fields of `update`, returning whether anything was written.
    pub fn apply(&mut self, update: &RoomUpdate, now_ms: u64) -> bool {
        if self.id != update.id {
            return false;
        }
        self.is_vacant = update.is_vacant;
        if let Some(inactive) = update.is_inactive {
            self.is_inactive = inactive;
        }
        self.last_update = Some(now_ms);
        true
    }
}

/// Payload entry of a `ROOM_UPDATE` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomUpdate {
    pub id: String,
    pub is_vacant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_inactive: Option<bool>,
}

impl RoomUpdate {
    pub fn new(id: impl Into<String>, is_vacant: bool) -> Self {
        Self {
            id: id.into(),
            is_vacant,
            is_inactive: None,
        }
    }

    pub fn with_inactive(mut self, is_inactive: bool) -> Self {
        self.is_inactive = Some(is_inactive);
        self
    }
}

/// Payload of an `INITIAL_DATA` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitialData {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub labels: LabelMap,
}
