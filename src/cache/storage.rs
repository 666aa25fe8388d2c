use super::KeyValueStore;
use crate::infrastructure::{Clock, SystemClock};
use crate::types::constants::cache_keys;
use crate::types::{CACHE_VERSION, LABEL_CACHE_TTL, LabelMap, ROOM_CACHE_TTL, Result, Room, RoomUpdate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Metadata stamped on every entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub version: String,
    pub timestamp: u64,
    pub ttl: u64,
}

/// Stored shape: `{ data, config }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub config: CacheConfig,
}

/// Versioned TTL cache over a [`KeyValueStore`].
///
/// Reads fail soft: a missing, unreadable, wrong-version or expired entry is a miss, and the
/// last three are purged on the way out. The cache is an accelerator; nothing upstream treats it
/// as the source of truth.
#[derive(Clone)]
pub struct LocalCache {
    backend: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    room_ttl: Duration,
    label_ttl: Duration,
}

impl LocalCache {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            room_ttl: Duration::from_millis(ROOM_CACHE_TTL),
            label_ttl: Duration::from_millis(LABEL_CACHE_TTL),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttls(mut self, room_ttl: Duration, label_ttl: Duration) -> Self {
        self.room_ttl = room_ttl;
        self.label_ttl = label_ttl;
        self
    }

    /// Key under which a hotel's room list is stored
    pub fn rooms_key(hotel_id: &str) -> String {
        format!("{}{}", cache_keys::ROOMS_PREFIX, hotel_id)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Cache retrieval error for {}: {}", key, e);
                return None;
            }
        };

        let entry: CachedData<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Unreadable cache entry {}: {}", key, e);
                self.purge(key).await;
                return None;
            }
        };

        if entry.config.version != CACHE_VERSION {
            tracing::debug!(
                "Cache entry {} has version {}, expected {}",
                key,
                entry.config.version,
                CACHE_VERSION
            );
            self.purge(key).await;
            return None;
        }

        if self.is_expired(&entry.config) {
            tracing::debug!("Cache entry {} expired", key);
            self.purge(key).await;
            return None;
        }

        match serde_json::from_value(entry.data) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!("Cache entry {} has unexpected shape: {}", key, e);
                self.purge(key).await;
                None
            }
        }
    }

    /// Stores `data` stamped with the current version and time. `ttl` defaults to the room TTL.
    pub async fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Option<Duration>) -> Result<()> {
        let entry = CachedData {
            data,
            config: self.create_config(ttl.unwrap_or(self.room_ttl)),
        };
        let raw = serde_json::to_string(&entry)?;
        self.backend.set(key, raw).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove(key).await
    }

    pub async fn get_rooms(&self, hotel_id: &str) -> Option<Vec<Room>> {
        self.get(&Self::rooms_key(hotel_id)).await
    }

    pub async fn set_rooms(&self, hotel_id: &str, rooms: &[Room]) -> Result<()> {
        self.set(&Self::rooms_key(hotel_id), &rooms, Some(self.room_ttl))
            .await
    }

    pub async fn get_labels(&self) -> Option<LabelMap> {
        self.get(cache_keys::LABELS).await
    }

    pub async fn set_labels(&self, labels: &LabelMap) -> Result<()> {
        self.set(cache_keys::LABELS, labels, Some(self.label_ttl))
            .await
    }

    /// Patches one cached room in place. Returns `Ok(false)` when the list is not cached or the
    /// room is not in it.
    pub async fn update_room(&self, hotel_id: &str, update: &RoomUpdate) -> Result<bool> {
        let Some(mut rooms) = self.get_rooms(hotel_id).await else {
            return Ok(false);
        };
        let now = self.clock.now_ms();
        let Some(room) = rooms.iter_mut().find(|room| room.id == update.id) else {
            return Ok(false);
        };
        room.apply(update, now);
        self.set_rooms(hotel_id, &rooms).await?;
        Ok(true)
    }

    fn create_config(&self, ttl: Duration) -> CacheConfig {
        CacheConfig {
            version: CACHE_VERSION.to_string(),
            timestamp: self.clock.now_ms(),
            ttl: ttl.as_millis() as u64,
        }
    }

    fn is_expired(&self, config: &CacheConfig) -> bool {
        self.clock.now_ms().saturating_sub(config.timestamp) > config.ttl
    }

    async fn purge(&self, key: &str) {
        if let Err(e) = self.backend.remove(key).await {
            tracing::warn!("Failed to purge cache entry {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::infrastructure::ManualClock;
    use proptest::prelude::*;

    fn rooms() -> Vec<Room> {
        (1..=5)
            .map(|n| Room::new(format!("{:04}", n), "standard", true))
            .collect()
    }

    fn cache_with_clock() -> (LocalCache, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = LocalCache::new(store.clone()).with_clock(clock.clone());
        (cache, store, clock)
    }

    #[tokio::test]
    async fn test_rooms_round_trip_within_ttl() {
        let (cache, _, clock) = cache_with_clock();
        cache.set_rooms("hotel1", &rooms()).await.unwrap();

        clock.advance(Duration::from_millis(ROOM_CACHE_TTL));
        assert_eq!(cache.get_rooms("hotel1").await, Some(rooms()));
        assert_eq!(cache.get_rooms("hotel2").await, None);
    }

    #[tokio::test]
    async fn test_expired_rooms_miss_and_are_purged() {
        let (cache, store, clock) = cache_with_clock();
        cache.set_rooms("hotel1", &rooms()).await.unwrap();

        clock.advance(Duration::from_millis(ROOM_CACHE_TTL + 1));
        assert_eq!(cache.get_rooms("hotel1").await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_labels_outlive_rooms() {
        let (cache, _, clock) = cache_with_clock();
        let labels = LabelMap::from([("suite".to_string(), "Suite".to_string())]);
        cache.set_rooms("hotel1", &rooms()).await.unwrap();
        cache.set_labels(&labels).await.unwrap();

        clock.advance(Duration::from_secs(60 * 60));
        assert_eq!(cache.get_rooms("hotel1").await, None);
        assert_eq!(cache.get_labels().await, Some(labels));
    }

    #[tokio::test]
    async fn test_version_mismatch_is_a_miss() {
        let (cache, store, _) = cache_with_clock();
        let stale = serde_json::json!({
            "data": rooms(),
            "config": { "version": "0.9.0", "timestamp": 1_000_000, "ttl": 600_000 }
        });
        store
            .set("rooms_hotel1", stale.to_string())
            .await
            .unwrap();

        assert_eq!(cache.get_rooms("hotel1").await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_garbage_entry_is_a_miss() {
        let (cache, store, _) = cache_with_clock();
        store.set("room_labels", "{oops".to_string()).await.unwrap();
        assert_eq!(cache.get_labels().await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_stamps_version_and_time() {
        let (cache, store, _) = cache_with_clock();
        cache
            .set("custom", &42, Some(Duration::from_secs(1)))
            .await
            .unwrap();

        let raw = store.get("custom").await.unwrap().unwrap();
        let entry: CachedData<i32> = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.data, 42);
        assert_eq!(
            entry.config,
            CacheConfig {
                version: CACHE_VERSION.to_string(),
                timestamp: 1_000_000,
                ttl: 1000,
            }
        );
    }

    #[tokio::test]
    async fn test_update_room_patches_single_entry() {
        let (cache, _, _) = cache_with_clock();
        cache.set_rooms("hotel1", &rooms()).await.unwrap();

        let patched = cache
            .update_room("hotel1", &RoomUpdate::new("0003", false))
            .await
            .unwrap();
        assert!(patched);

        let cached = cache.get_rooms("hotel1").await.unwrap();
        for room in &cached {
            assert_eq!(room.is_vacant, room.id != "0003");
        }
    }

    #[tokio::test]
    async fn test_update_room_without_cached_list_is_noop() {
        let (cache, store, _) = cache_with_clock();
        let patched = cache
            .update_room("hotel1", &RoomUpdate::new("0003", false))
            .await
            .unwrap();
        assert!(!patched);
        assert!(store.is_empty().await);

        cache.set_rooms("hotel1", &rooms()).await.unwrap();
        let patched = cache
            .update_room("hotel1", &RoomUpdate::new("9999", false))
            .await
            .unwrap();
        assert!(!patched);
        assert_eq!(cache.get_rooms("hotel1").await, Some(rooms()));
    }

    fn arb_room() -> impl Strategy<Value = Room> {
        (
            "[0-9]{1,4}",
            prop::sample::select(vec!["premium", "standard", "suite"]),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(id, label, vacant, inactive)| {
                Room::new(id, label, vacant).with_inactive(inactive)
            })
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        /// Stored rooms come back unchanged until their TTL runs out, then miss
        #[test]
        fn prop_rooms_round_trip_until_expiry(
            rooms in prop::collection::vec(arb_room(), 0..20),
            hotel in "[a-z0-9]{1,10}",
            age in 0..=ROOM_CACHE_TTL,
        ) {
            let (hit, after_expiry) = block_on(async {
                let (cache, _, clock) = cache_with_clock();
                cache.set_rooms(&hotel, &rooms).await.unwrap();
                clock.advance(Duration::from_millis(age));
                let hit = cache.get_rooms(&hotel).await;
                clock.advance(Duration::from_millis(ROOM_CACHE_TTL + 1));
                (hit, cache.get_rooms(&hotel).await)
            });
            prop_assert_eq!(hit, Some(rooms));
            prop_assert_eq!(after_expiry, None);
        }

        #[test]
        fn prop_labels_round_trip(
            labels in prop::collection::btree_map("[a-z_]{1,8}", ".{0,12}", 1..6),
        ) {
            let stored = block_on(async {
                let (cache, _, _) = cache_with_clock();
                cache.set_labels(&labels).await.unwrap();
                cache.get_labels().await
            });
            prop_assert_eq!(stored, Some(labels));
        }
    }
}
