//! Offline feed: generated rooms and simulated churn, served without a transport.

use crate::cache::LocalCache;
use crate::client::{ConnectionState, Link, SendOutcome};
use crate::infrastructure::TaskSlot;
use crate::messaging::{MessageKind, MessageRouter};
use crate::store::LiveStore;
use crate::types::{Envelope, LabelMap, Result, Room, RoomUpdate, SyncError};
use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

struct Category {
    label: &'static str,
    count: usize,
    /// Percent of rooms occupied on average
    occupancy: u32,
}

const HOTEL1: &[Category] = &[
    Category { label: "premium", count: 4, occupancy: 75 },
    Category { label: "standard", count: 4, occupancy: 60 },
    Category { label: "suite", count: 2, occupancy: 90 },
];

const HOTEL2: &[Category] = &[
    Category { label: "premium", count: 3, occupancy: 80 },
    Category { label: "standard", count: 5, occupancy: 70 },
    Category { label: "suite", count: 2, occupancy: 85 },
];

const FIRST_ROOM_NUMBER: u32 = 101;
const INACTIVE_CHANCE: f64 = 0.1;

fn profile(hotel_id: &str) -> Option<&'static [Category]> {
    match hotel_id {
        "hotel1" => Some(HOTEL1),
        "hotel2" => Some(HOTEL2),
        _ => None,
    }
}

/// Random rooms for one of the demo hotels, numbered from 101
pub fn generate_rooms(hotel_id: &str) -> Result<Vec<Room>> {
    let categories =
        profile(hotel_id).ok_or_else(|| SyncError::UnknownHotel(hotel_id.to_string()))?;

    let mut rng = rand::rng();
    let mut number = FIRST_ROOM_NUMBER;
    let mut rooms = Vec::new();
    for category in categories {
        for _ in 0..category.count {
            let occupied = rng.random_ratio(category.occupancy, 100);
            let inactive = rng.random_bool(INACTIVE_CHANCE);
            rooms.push(Room::new(number.to_string(), category.label, !occupied).with_inactive(inactive));
            number += 1;
        }
    }
    Ok(rooms)
}

pub fn demo_labels() -> LabelMap {
    [("premium", "Premium"), ("standard", "Standard"), ("suite", "Suite")]
        .into_iter()
        .map(|(key, name)| (key.to_string(), name.to_string()))
        .collect()
}

/// Flips the vacancy of one random room
fn random_toggle(rooms: &[Room]) -> Option<RoomUpdate> {
    let room = rooms.choose(&mut rand::rng())?;
    Some(RoomUpdate::new(room.id.clone(), !room.is_vacant))
}

/// Stands in for the connection in demo mode.
///
/// Frames are fed through the same router the live connection uses, so the store, the cache,
/// subscribers and snapshot replay behave exactly as they do online.
pub struct DemoConnection {
    router: Arc<MessageRouter>,
    store: LiveStore,
    cache: LocalCache,
    interval: Duration,
    state_tx: watch::Sender<ConnectionState>,
    churn: Mutex<TaskSlot>,
}

impl DemoConnection {
    pub fn new(
        router: Arc<MessageRouter>,
        store: LiveStore,
        cache: LocalCache,
        interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            router,
            store,
            cache,
            interval,
            state_tx,
            churn: Mutex::new(TaskSlot::new()),
        }
    }

    /// Cached data wins; only what misses is generated
    async fn load(&self, hotel_id: &str) -> Result<(Vec<Room>, LabelMap)> {
        let rooms = match self.cache.get_rooms(hotel_id).await {
            Some(rooms) => {
                tracing::debug!("Demo rooms for {} served from cache", hotel_id);
                rooms
            }
            None => generate_rooms(hotel_id)?,
        };
        let labels = self.cache.get_labels().await.unwrap_or_else(demo_labels);
        Ok((rooms, labels))
    }

    fn start_churn(&self) {
        let router = Arc::clone(&self.router);
        let store = self.store.clone();
        let interval = self.interval;

        self.churn().spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(update) = random_toggle(&store.rooms().await) else {
                    continue;
                };
                match Envelope::room_update(&update) {
                    Ok(envelope) => {
                        router.route(envelope).await;
                    }
                    Err(e) => tracing::warn!("Could not build demo update: {}", e),
                }
            }
        });
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn churn(&self) -> MutexGuard<'_, TaskSlot> {
        self.churn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Link for DemoConnection {
    async fn connect(&self) -> Result<()> {
        if self.state().is_active() {
            return Ok(());
        }
        let Some(hotel_id) = self.store.selected_hotel().await else {
            tracing::warn!("No hotel selected, not starting demo feed");
            return Ok(());
        };
        self.set_state(ConnectionState::Connecting);

        let (rooms, labels) = match self.load(&hotel_id).await {
            Ok(data) => data,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        tracing::info!("Demo feed for {} with {} rooms", hotel_id, rooms.len());
        self.router.bind_hotel(Some(hotel_id.clone()));
        self.router
            .route(Envelope::initial_data(rooms, labels)?)
            .await;

        self.set_state(ConnectionState::Connected);
        self.start_churn();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.churn().abort();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Demo feed stopped");
        Ok(())
    }

    async fn force_reconnect(&self) -> Result<()> {
        Link::disconnect(self).await?;
        Link::connect(self).await
    }

    /// Room updates are echoed back as if the server had applied them
    async fn send(&self, envelope: Envelope) -> Result<SendOutcome> {
        if envelope.kind == MessageKind::RoomUpdate {
            self.router.route(envelope).await;
        }
        Ok(SendOutcome::Sent)
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}
