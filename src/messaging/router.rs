use super::{MessageKind, Validator};
use crate::broadcast::{CrossTabBroadcaster, Published};
use crate::cache::LocalCache;
use crate::client::OutboundQueue;
use crate::infrastructure::{Liveness, TelemetryEvent, TelemetrySink};
use crate::store::LiveStore;
use crate::types::{Envelope, InitialData, RoomUpdate};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};

/// Applies inbound frames to the view model and the cache, then republishes them to every tab
pub struct MessageRouter {
    validator: Validator,
    store: LiveStore,
    cache: LocalCache,
    broadcaster: CrossTabBroadcaster,
    outbound: Arc<OutboundQueue>,
    liveness: Arc<Liveness>,
    telemetry: Arc<dyn TelemetrySink>,
    /// Hotel the current feed was opened for; cache writes are keyed by it
    hotel: RwLock<Option<String>>,
}

impl MessageRouter {
    pub fn new(
        validator: Validator,
        store: LiveStore,
        cache: LocalCache,
        broadcaster: CrossTabBroadcaster,
        outbound: Arc<OutboundQueue>,
        liveness: Arc<Liveness>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            validator,
            store,
            cache,
            broadcaster,
            outbound,
            liveness,
            telemetry,
            hotel: RwLock::new(None),
        }
    }

    /// Ties every following frame to `hotel_id`, regardless of what the view has selected since
    pub fn bind_hotel(&self, hotel_id: Option<String>) {
        *self.hotel.write().unwrap_or_else(PoisonError::into_inner) = hotel_id;
    }

    pub fn hotel(&self) -> Option<String> {
        self.hotel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent `INITIAL_DATA` for the bound hotel, from this tab or a sibling
    pub fn snapshot(&self) -> Option<Envelope> {
        self.broadcaster.snapshot_for(self.hotel().as_deref())
    }

    /// Validates and routes one raw frame. Invalid frames are logged and dropped with no other
    /// effect. Returns whether the frame was accepted.
    pub async fn route_frame(&self, raw: &str) -> bool {
        self.liveness.record_activity();

        match self.validator.validate(raw) {
            Ok(envelope) => self.route(envelope).await,
            Err(e) => {
                tracing::warn!("Dropping inbound frame: {}", e);
                false
            }
        }
    }

    /// Routes an already validated envelope
    pub async fn route(&self, envelope: Envelope) -> bool {
        let hotel_id = self.hotel();

        match envelope.kind {
            MessageKind::Ping => {
                tracing::trace!("Ping from server");
                return true;
            }
            MessageKind::InitialData => {
                let Some(data) = parse_initial_data(&envelope.payload) else {
                    return false;
                };
                self.show_snapshot(&data).await;
                self.cache_snapshot(hotel_id.as_deref(), &data).await;
            }
            MessageKind::RoomUpdate => {
                self.apply_room_updates(hotel_id.as_deref(), &envelope.payload)
                    .await
            }
            MessageKind::Error => {
                let message = error_message(&envelope.payload);
                tracing::warn!("Server reported error: {}", message);
                self.store.set_error(Some(message)).await;
            }
            MessageKind::SubscribeHotel | MessageKind::Disconnect => {
                tracing::debug!("Received {} from server", envelope.kind);
            }
        }

        if self.outbound.acknowledge(&envelope.message_id).await {
            tracing::debug!("Acknowledged {}", envelope.message_id);
        }
        self.broadcaster.publish_for(hotel_id.as_deref(), envelope);
        true
    }

    /// Applies a frame a sibling tab received to this tab's view model.
    ///
    /// Only frames for the hotel this tab is viewing are taken. Nothing is cached, acknowledged
    /// or republished, since the receiving tab already did that. Returns whether the store was
    /// touched.
    pub async fn mirror(&self, published: &Published) -> bool {
        if published.origin == self.broadcaster.origin() {
            return false;
        }
        let selected = self.store.selected_hotel().await;
        if !published.concerns(selected.as_deref()) {
            return false;
        }

        let envelope = &published.envelope;
        match envelope.kind {
            MessageKind::InitialData => {
                let Some(data) = parse_initial_data(&envelope.payload) else {
                    return false;
                };
                self.show_snapshot(&data).await;
            }
            MessageKind::RoomUpdate => {
                for update in normalize_updates(&envelope.payload) {
                    self.store.apply_update(&update).await;
                }
                self.store.set_loading(false).await;
            }
            MessageKind::Error => {
                self.store
                    .set_error(Some(error_message(&envelope.payload)))
                    .await;
            }
            _ => return false,
        }
        tracing::trace!("Mirrored {} from tab {}", envelope.kind, published.origin);
        true
    }

    /// Fills an empty view from the latest snapshot a sibling tab holds for the selected hotel
    pub async fn hydrate_from_siblings(&self) -> bool {
        let Some(latest) = self.broadcaster.hub().latest_snapshot() else {
            return false;
        };
        if !self.store.rooms().await.is_empty() {
            return false;
        }
        let hydrated = self.mirror(&latest).await;
        if hydrated {
            tracing::debug!("View hydrated from tab {}", latest.origin);
        }
        hydrated
    }

    async fn show_snapshot(&self, data: &InitialData) {
        tracing::info!(
            "Snapshot with {} rooms and {} labels",
            data.rooms.len(),
            data.labels.len()
        );
        self.store
            .set_entities(data.rooms.clone(), data.labels.clone())
            .await;
        self.store.set_error(None).await;
        self.store.set_loading(false).await;
    }

    async fn cache_snapshot(&self, hotel_id: Option<&str>, data: &InitialData) {
        if let Some(hotel_id) = hotel_id
            && let Err(e) = self.cache.set_rooms(hotel_id, &data.rooms).await
        {
            self.cache_write_failed("rooms", &e.to_string());
        }
        if !data.labels.is_empty()
            && let Err(e) = self.cache.set_labels(&data.labels).await
        {
            self.cache_write_failed("labels", &e.to_string());
        }
    }

    async fn apply_room_updates(&self, hotel_id: Option<&str>, payload: &Value) {
        for update in normalize_updates(payload) {
            if !self.store.apply_update(&update).await {
                tracing::debug!("Update for unknown room {}", update.id);
                continue;
            }
            if let Some(hotel_id) = hotel_id
                && let Err(e) = self.cache.update_room(hotel_id, &update).await
            {
                self.cache_write_failed("room", &e.to_string());
            }
        }
        self.store.set_loading(false).await;
    }

    fn cache_write_failed(&self, what: &str, error: &str) {
        tracing::warn!("Cache write for {} failed: {}", what, error);
        self.telemetry
            .track(TelemetryEvent::new("Cache", "Write Failed").with_label(what));
    }
}

fn parse_initial_data(payload: &Value) -> Option<InitialData> {
    match serde_json::from_value(payload.clone()) {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::warn!("Dropping INITIAL_DATA with bad payload: {}", e);
            None
        }
    }
}

fn error_message(payload: &Value) -> String {
    match payload {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}

/// A `ROOM_UPDATE` payload is either one update or an array of them. Entries that do not parse
/// are skipped.
pub fn normalize_updates(payload: &Value) -> Vec<RoomUpdate> {
    let entries: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry.clone()) {
            Ok(update) => Some(update),
            Err(e) => {
                tracing::debug!("Skipping malformed room update {}: {}", entry, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{BroadcastHub, Subscription};
    use proptest::prelude::*;
    use crate::cache::MemoryStore;
    use crate::infrastructure::NoopTelemetry;
    use crate::types::{LabelMap, MAX_FRAME_SIZE, Room};
    use serde_json::json;

    struct Fixture {
        router: MessageRouter,
        store: LiveStore,
        cache: LocalCache,
        backend: Arc<MemoryStore>,
        outbound: Arc<OutboundQueue>,
        sub: Subscription,
    }

    async fn fixture() -> Fixture {
        fixture_on(BroadcastHub::default()).await
    }

    async fn fixture_on(hub: BroadcastHub) -> Fixture {
        let store = LiveStore::new();
        store.set_selected_hotel(Some("hotel1".into())).await;
        let backend = Arc::new(MemoryStore::new());
        let cache = LocalCache::new(backend.clone());
        let broadcaster = CrossTabBroadcaster::new(hub);
        let sub = broadcaster.subscribe(None);
        let outbound = Arc::new(OutboundQueue::new(MAX_FRAME_SIZE, 100, 3));
        let router = MessageRouter::new(
            Validator::new(MAX_FRAME_SIZE),
            store.clone(),
            cache.clone(),
            broadcaster,
            outbound.clone(),
            Arc::new(Liveness::default()),
            Arc::new(NoopTelemetry),
        );
        router.bind_hotel(Some("hotel1".into()));
        Fixture {
            router,
            store,
            cache,
            backend,
            outbound,
            sub,
        }
    }

    fn five_rooms() -> Vec<Room> {
        (1..=5)
            .map(|n| Room::new(format!("{:04}", n), "standard", true))
            .collect()
    }

    fn labels() -> LabelMap {
        LabelMap::from([("standard".to_string(), "Standard".to_string())])
    }

    fn frame(kind: &str, payload: Value) -> String {
        json!({ "type": kind, "payload": payload, "timestamp": 1, "messageId": "srv-1" }).to_string()
    }

    #[tokio::test]
    async fn test_initial_data_replaces_state_and_warms_cache() {
        let mut f = fixture().await;
        f.store.set_error(Some("stale".into())).await;
        f.store.set_loading(true).await;

        let raw = frame("INITIAL_DATA", json!({ "rooms": five_rooms(), "labels": labels() }));
        assert!(f.router.route_frame(&raw).await);

        let state = f.store.snapshot().await;
        assert_eq!(state.rooms, five_rooms());
        assert_eq!(state.labels, labels());
        assert_eq!(state.error, None);
        assert!(!state.loading);
        assert_eq!(f.cache.get_rooms("hotel1").await, Some(five_rooms()));
        assert_eq!(f.cache.get_labels().await, Some(labels()));

        let published = f.sub.try_recv().unwrap();
        assert_eq!(published.kind, MessageKind::InitialData);
        assert_eq!(f.router.snapshot(), Some(published));
    }

    #[tokio::test]
    async fn test_initial_data_is_idempotent() {
        let f = fixture().await;
        let raw = frame("INITIAL_DATA", json!({ "rooms": five_rooms(), "labels": labels() }));

        f.router.route_frame(&raw).await;
        let once = f.store.snapshot().await;
        f.router.route_frame(&raw).await;
        let twice = f.store.snapshot().await;

        assert_eq!(once.rooms, twice.rooms);
        assert_eq!(once.labels, twice.labels);
        assert_eq!(once.error, twice.error);
    }

    #[tokio::test]
    async fn test_room_update_patches_store_and_cache() {
        let mut f = fixture().await;
        f.router
            .route_frame(&frame("INITIAL_DATA", json!({ "rooms": five_rooms(), "labels": {} })))
            .await;
        f.sub.try_recv();

        let raw = frame("ROOM_UPDATE", json!({ "id": "0003", "is_vacant": false }));
        assert!(f.router.route_frame(&raw).await);

        for room in f.store.rooms().await {
            assert_eq!(room.is_vacant, room.id != "0003", "room {}", room.id);
            assert!(!room.is_inactive);
        }
        for room in f.cache.get_rooms("hotel1").await.unwrap() {
            assert_eq!(room.is_vacant, room.id != "0003", "cached room {}", room.id);
        }
        assert_eq!(f.sub.try_recv().unwrap().kind, MessageKind::RoomUpdate);
    }

    #[tokio::test]
    async fn test_batched_updates_apply_each_entry() {
        let f = fixture().await;
        f.store.set_entities(five_rooms(), LabelMap::new()).await;

        let raw = frame(
            "ROOM_UPDATE",
            json!([
                { "id": "0001", "is_vacant": false },
                { "id": "0002", "is_vacant": true, "is_inactive": true },
                { "bogus": true },
                { "id": "9999", "is_vacant": false }
            ]),
        );
        assert!(f.router.route_frame(&raw).await);

        let rooms = f.store.rooms().await;
        assert!(!rooms[0].is_vacant);
        assert!(rooms[1].is_vacant && rooms[1].is_inactive);
        assert!(rooms[2..].iter().all(|r| r.is_vacant && !r.is_inactive));
    }

    #[tokio::test]
    async fn test_invalid_frames_have_no_side_effects() {
        let mut f = fixture().await;
        f.store.set_entities(five_rooms(), LabelMap::new()).await;
        let before = f.store.snapshot().await;

        let oversized = frame(
            "ROOM_UPDATE",
            json!({ "id": "0001", "is_vacant": false, "pad": "x".repeat(MAX_FRAME_SIZE) }),
        );
        let rejected = [
            frame("ROOM_UPDATES", json!({ "id": "0001", "is_vacant": false })),
            json!({ "type": "ROOM_UPDATE", "payload": { "id": "0001", "is_vacant": false }, "messageId": "x" }).to_string(),
            "not json at all".to_string(),
            oversized,
        ];
        for raw in &rejected {
            assert!(!f.router.route_frame(raw).await);
        }

        assert_eq!(f.store.snapshot().await, before);
        assert!(f.backend.is_empty().await);
        assert_eq!(f.sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_ping_is_not_published() {
        let mut f = fixture().await;
        assert!(f.router.route_frame(&frame("PING", Value::Null)).await);
        assert_eq!(f.sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_error_frame_sets_flag_and_is_published() {
        let mut f = fixture().await;
        assert!(f.router.route_frame(&frame("ERROR", json!("hotel not found"))).await);
        assert_eq!(f.store.snapshot().await.error.as_deref(), Some("hotel not found"));
        assert_eq!(f.sub.try_recv().unwrap().kind, MessageKind::Error);
    }

    #[tokio::test]
    async fn test_echo_acknowledges_pending_send() {
        let f = fixture().await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        f.outbound.attach(tx).await;
        let sent = Envelope::room_update(&RoomUpdate::new("0001", false)).unwrap();
        f.outbound.send(sent.clone()).await;
        assert_eq!(f.outbound.pending_len().await, 1);

        let echo = serde_json::to_string(&sent).unwrap();
        f.router.route_frame(&echo).await;
        assert_eq!(f.outbound.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_snapshot_keeps_pending_record() {
        let f = fixture().await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        f.outbound.attach(tx).await;
        let sent = Envelope::room_update(&RoomUpdate::new("0001", false)).unwrap();
        f.outbound.send(sent.clone()).await;

        let mut bogus = Envelope::initial_data(vec![], LabelMap::new())
            .unwrap()
            .with_message_id(sent.message_id.clone());
        bogus.payload = json!("not a snapshot");
        assert!(!f.router.route(bogus).await);
        assert_eq!(f.outbound.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_follows_bound_hotel_not_selection() {
        let f = fixture().await;
        f.store.set_selected_hotel(Some("hotel2".into())).await;

        let raw = frame("INITIAL_DATA", json!({ "rooms": five_rooms(), "labels": labels() }));
        assert!(f.router.route_frame(&raw).await);
        assert_eq!(f.cache.get_rooms("hotel1").await, Some(five_rooms()));
        assert_eq!(f.cache.get_rooms("hotel2").await, None);

        f.router
            .route_frame(&frame("ROOM_UPDATE", json!({ "id": "0002", "is_vacant": false })))
            .await;
        assert_eq!(f.cache.get_rooms("hotel2").await, None);
        let cached = f.cache.get_rooms("hotel1").await.unwrap();
        assert!(!cached[1].is_vacant);
    }

    #[tokio::test]
    async fn test_sibling_frames_are_mirrored_without_caching() {
        let hub = BroadcastHub::default();
        let receiving = fixture_on(hub.clone()).await;
        let sibling = fixture_on(hub).await;

        let raw = frame("INITIAL_DATA", json!({ "rooms": five_rooms(), "labels": labels() }));
        receiving.router.route_frame(&raw).await;
        let published = match receiving.router.broadcaster.hub().latest_snapshot() {
            Some(published) => published,
            None => panic!("snapshot not remembered"),
        };

        // The tab that received it first-hand does not mirror its own frame
        assert!(!receiving.router.mirror(&published).await);

        assert!(sibling.router.mirror(&published).await);
        assert_eq!(sibling.store.rooms().await, five_rooms());
        assert!(sibling.backend.is_empty().await);

        let update = Published {
            envelope: Envelope::room_update(&RoomUpdate::new("0004", false)).unwrap(),
            ..published.clone()
        };
        assert!(sibling.router.mirror(&update).await);
        assert!(!sibling.store.room("0004").await.unwrap().is_vacant);
        assert!(sibling.backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_frames_for_another_hotel_are_not_mirrored() {
        let hub = BroadcastHub::default();
        let sibling = fixture_on(hub).await;
        sibling.store.set_selected_hotel(Some("hotel2".into())).await;

        let data = InitialData {
            rooms: five_rooms(),
            labels: labels(),
        };
        let published = Published {
            origin: 0,
            hotel_id: Some("hotel1".into()),
            envelope: Envelope::initial_data(data.rooms, data.labels).unwrap(),
        };
        assert!(!sibling.router.mirror(&published).await);
        assert!(!sibling.router.hydrate_from_siblings().await);
        assert!(sibling.store.rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_view_hydrates_from_sibling_snapshot() {
        let hub = BroadcastHub::default();
        let receiving = fixture_on(hub.clone()).await;
        let raw = frame("INITIAL_DATA", json!({ "rooms": five_rooms(), "labels": labels() }));
        receiving.router.route_frame(&raw).await;

        let late = fixture_on(hub).await;
        assert!(late.router.hydrate_from_siblings().await);
        assert_eq!(late.store.rooms().await, five_rooms());
        assert_eq!(late.router.snapshot().map(|e| e.kind), Some(MessageKind::InitialData));
        // Already populated: nothing to do
        assert!(!late.router.hydrate_from_siblings().await);
    }

    #[test]
    fn test_normalize_single_and_batch() {
        assert_eq!(
            normalize_updates(&json!({ "id": "1", "is_vacant": true })),
            vec![RoomUpdate::new("1", true)]
        );
        assert_eq!(
            normalize_updates(&json!([{ "id": "1", "is_vacant": true }, 5])),
            vec![RoomUpdate::new("1", true)]
        );
        assert!(normalize_updates(&Value::Null).is_empty());
    }

    fn near_miss_frame() -> impl Strategy<Value = String> {
        ("[A-Z_]{0,14}", prop::option::of(0i64..10), prop::option::of("[a-z]{1,4}")).prop_map(
            |(kind, timestamp, message_id)| {
                let mut frame = json!({
                    "type": kind.as_str(),
                    "payload": { "id": "0001", "is_vacant": false }
                });
                if let Some(timestamp) = timestamp {
                    frame["timestamp"] = json!(timestamp);
                }
                if let Some(message_id) = message_id {
                    frame["messageId"] = json!(message_id);
                }
                frame.to_string()
            },
        )
    }

    proptest! {
        /// Whatever the validator turns away leaves the view, the cache and every feed untouched
        #[test]
        fn prop_rejected_frames_have_no_effect(
            raw in prop_oneof![any::<String>(), near_miss_frame()],
        ) {
            prop_assume!(!Validator::new(MAX_FRAME_SIZE).is_valid(&raw));

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (accepted, unchanged, cache_empty, published) = runtime.block_on(async {
                let mut f = fixture().await;
                f.store.set_entities(five_rooms(), labels()).await;
                let before = f.store.snapshot().await;
                let accepted = f.router.route_frame(&raw).await;
                (
                    accepted,
                    f.store.snapshot().await == before,
                    f.backend.is_empty().await,
                    f.sub.try_recv(),
                )
            });
            prop_assert!(!accepted);
            prop_assert!(unchanged);
            prop_assert!(cache_empty);
            prop_assert_eq!(published, None);
        }
    }
}
