//! The view model the UI renders from.
//!
//! The synchronizer writes rooms, labels and status flags into it and reads the current hotel
//! selection back out. UI code holds the same handle.

use crate::infrastructure::clock::now_ms;
use crate::types::{LabelMap, Room, RoomUpdate};
use std::sync::Arc;
use tokio::sync::{RwLock, watch};

/// Everything the live dashboard displays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveState {
    pub rooms: Vec<Room>,
    pub labels: LabelMap,
    pub selected_hotel: Option<String>,
    pub loading: bool,
    /// Set from `ERROR` frames, cleared by a fresh snapshot
    pub error: Option<String>,
    /// Milliseconds since the epoch of the last room change
    pub last_update: Option<u64>,
}

/// Shared handle to the view model. Clones observe the same state.
#[derive(Clone)]
pub struct LiveStore {
    state: Arc<RwLock<LiveState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl LiveStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(LiveState::default())),
            revision: Arc::new(revision),
        }
    }

    /// Ticks every time the state changes
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub async fn snapshot(&self) -> LiveState {
        self.state.read().await.clone()
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.state.read().await.rooms.clone()
    }

    pub async fn room(&self, id: &str) -> Option<Room> {
        self.state
            .read()
            .await
            .rooms
            .iter()
            .find(|room| room.id == id)
            .cloned()
    }

    pub async fn labels(&self) -> LabelMap {
        self.state.read().await.labels.clone()
    }

    pub async fn selected_hotel(&self) -> Option<String> {
        self.state
            .read()
            .await
            .selected_hotel
            .clone()
            .filter(|hotel| !hotel.is_empty())
    }

    pub async fn set_selected_hotel(&self, hotel_id: Option<String>) {
        self.state.write().await.selected_hotel = hotel_id;
        self.bump();
    }

    /// Replaces the room list. Labels are only replaced by a non-empty map.
    pub async fn set_entities(&self, rooms: Vec<Room>, labels: LabelMap) {
        {
            let mut state = self.state.write().await;
            state.rooms = rooms;
            if !labels.is_empty() {
                state.labels = labels;
            }
            state.last_update = Some(now_ms());
        }
        self.bump();
    }

    /// Forgets the rooms of the previous hotel. Labels are shared across hotels and stay.
    pub async fn clear_rooms(&self) {
        {
            let mut state = self.state.write().await;
            state.rooms.clear();
            state.error = None;
            state.last_update = None;
        }
        self.bump();
    }

    pub async fn set_room_state(&self, id: &str, is_vacant: bool) -> bool {
        self.patch(id, |room| room.is_vacant = is_vacant).await
    }

    pub async fn set_room_inactive(&self, id: &str, is_inactive: bool) -> bool {
        self.patch(id, |room| room.is_inactive = is_inactive).await
    }

    /// Applies one live update. Unknown room ids are ignored.
    pub async fn apply_update(&self, update: &RoomUpdate) -> bool {
        let now = now_ms();
        let applied = {
            let mut state = self.state.write().await;
            let applied = state
                .rooms
                .iter_mut()
                .find(|room| room.id == update.id)
                .is_some_and(|room| room.apply(update, now));
            if applied {
                state.last_update = Some(now);
            }
            applied
        };
        if applied {
            self.bump();
        }
        applied
    }

    pub async fn set_loading(&self, loading: bool) {
        self.state.write().await.loading = loading;
        self.bump();
    }

    pub async fn set_error(&self, error: Option<String>) {
        self.state.write().await.error = error;
        self.bump();
    }

    async fn patch(&self, id: &str, f: impl FnOnce(&mut Room)) -> bool {
        let now = now_ms();
        let found = {
            let mut state = self.state.write().await;
            match state.rooms.iter_mut().find(|room| room.id == id) {
                Some(room) => {
                    f(room);
                    room.last_update = Some(now);
                    state.last_update = Some(now);
                    true
                }
                None => false,
            }
        };
        if found {
            self.bump();
        }
        found
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for LiveStore {
    fn default() -> Self {
        Self::new()
    }
}
