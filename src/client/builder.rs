use super::{
    ConnectionManager, Link, OutboundQueue, StateSynchronizer, TokenCell, TokenSource,
};
use crate::broadcast::{BroadcastHub, CrossTabBroadcaster};
use crate::cache::{LocalCache, MemoryStore};
use crate::demo::DemoConnection;
use crate::infrastructure::{
    HttpTelemetry, KeepAliveMonitor, LogTelemetry, ReconnectPolicy, TaskManager, TaskSlot,
    TelemetrySink,
};
use crate::messaging::{MessageRouter, Validator};
use crate::store::LiveStore;
use crate::types::{
    BROADCAST_CAPACITY, DEMO_UPDATE_INTERVAL, DEV_WS_ENDPOINT, KEEP_ALIVE_INTERVAL,
    LABEL_CACHE_TTL, MAX_FRAME_SIZE, MAX_QUEUE_LEN, MAX_SEND_ATTEMPTS, ROOM_CACHE_TTL,
    SYNC_CHANNEL, VISIBILITY_DEBOUNCE,
};
use crate::websocket::{Connector, WebSocketConnector};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Where room data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeMode {
    /// The remote endpoint
    #[default]
    Live,
    /// Locally generated data with simulated churn; no transport is opened
    Demo,
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" | "production" => Ok(RuntimeMode::Live),
            "demo" | "offline" => Ok(RuntimeMode::Demo),
            other => Err(format!("unknown runtime mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub endpoint: String,
    pub mode: RuntimeMode,
    pub keep_alive_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub max_frame_size: usize,
    pub room_cache_ttl: Duration,
    pub label_cache_ttl: Duration,
    /// Cap on the offline FIFO; the oldest entry is dropped when full
    pub max_queue_len: usize,
    /// Transmissions allowed per update before replay gives up on it
    pub max_send_attempts: u32,
    /// Silent keep-alive intervals tolerated before the transport is closed; `None` disables
    pub max_missed_pongs: Option<u32>,
    pub demo_update_interval: Duration,
    pub visibility_debounce: Duration,
    pub broadcast_capacity: usize,
    pub telemetry_endpoint: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint().to_string(),
            mode: RuntimeMode::default(),
            keep_alive_interval: Duration::from_millis(KEEP_ALIVE_INTERVAL),
            reconnect: ReconnectPolicy::default(),
            max_frame_size: MAX_FRAME_SIZE,
            room_cache_ttl: Duration::from_millis(ROOM_CACHE_TTL),
            label_cache_ttl: Duration::from_millis(LABEL_CACHE_TTL),
            max_queue_len: MAX_QUEUE_LEN,
            max_send_attempts: MAX_SEND_ATTEMPTS,
            max_missed_pongs: None,
            demo_update_interval: Duration::from_millis(DEMO_UPDATE_INTERVAL),
            visibility_debounce: Duration::from_millis(VISIBILITY_DEBOUNCE),
            broadcast_capacity: BROADCAST_CAPACITY,
            telemetry_endpoint: None,
        }
    }
}

/// Debug builds talk to the local dev server; release builds use the endpoint baked in at
/// compile time.
fn default_endpoint() -> &'static str {
    if cfg!(debug_assertions) {
        DEV_WS_ENDPOINT
    } else {
        option_env!("ROOMSYNC_WS_ENDPOINT").unwrap_or(DEV_WS_ENDPOINT)
    }
}

impl SyncOptions {
    /// Defaults overlaid with `ROOMSYNC_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparsable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();

        if let Some(endpoint) = lookup("ROOMSYNC_WS_ENDPOINT").filter(|v| !v.is_empty()) {
            options.endpoint = endpoint;
        }
        if let Some(mode) = parse_var(&lookup, "ROOMSYNC_MODE") {
            options.mode = mode;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ROOMSYNC_KEEP_ALIVE_MS") {
            options.keep_alive_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ROOMSYNC_RECONNECT_INITIAL_MS") {
            options.reconnect.initial_delay = Duration::from_millis(ms);
        }
        if let Some(factor) = parse_var(&lookup, "ROOMSYNC_RECONNECT_FACTOR") {
            options.reconnect.factor = factor;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ROOMSYNC_RECONNECT_MAX_MS") {
            options.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var(&lookup, "ROOMSYNC_RECONNECT_MAX_ATTEMPTS") {
            options.reconnect.max_attempts = attempts;
        }
        if let Some(missed) = parse_var(&lookup, "ROOMSYNC_MAX_MISSED_PONGS") {
            options.max_missed_pongs = Some(missed);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ROOMSYNC_DEMO_INTERVAL_MS") {
            options.demo_update_interval = Duration::from_millis(ms);
        }
        if let Some(endpoint) = lookup("ROOMSYNC_TELEMETRY_ENDPOINT").filter(|v| !v.is_empty()) {
            options.telemetry_endpoint = Some(endpoint);
        }

        options
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

/// Builder for [`StateSynchronizer`]. Every collaborator has a default.
pub struct StateSynchronizerBuilder {
    options: SyncOptions,
    store: Option<LiveStore>,
    cache: Option<LocalCache>,
    credentials: Option<Arc<dyn TokenSource>>,
    hub: Option<BroadcastHub>,
    connector: Option<Arc<dyn Connector>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl StateSynchronizerBuilder {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            store: None,
            cache: None,
            credentials: None,
            hub: None,
            connector: None,
            telemetry: None,
        }
    }

    /// The view model shared with UI code
    pub fn store(mut self, store: LiveStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: LocalCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn token_source(mut self, credentials: Arc<dyn TokenSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Synchronizers built on clones of the same hub behave like tabs of one origin
    pub fn hub(mut self, hub: BroadcastHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Wire everything together and spawn the reconnect-signal listener.
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> StateSynchronizer {
        let options = self.options;

        let store = self.store.unwrap_or_default();
        let cache = self.cache.unwrap_or_else(|| {
            LocalCache::new(Arc::new(MemoryStore::new()))
                .with_ttls(options.room_cache_ttl, options.label_cache_ttl)
        });
        let telemetry: Arc<dyn TelemetrySink> = match (self.telemetry, &options.telemetry_endpoint) {
            (Some(telemetry), _) => telemetry,
            (None, Some(endpoint)) => Arc::new(HttpTelemetry::new(endpoint.clone())),
            (None, None) => Arc::new(LogTelemetry),
        };
        let hub = self
            .hub
            .unwrap_or_else(|| BroadcastHub::new(SYNC_CHANNEL, options.broadcast_capacity));
        let broadcaster = CrossTabBroadcaster::new(hub);

        let outbound = Arc::new(OutboundQueue::new(
            options.max_frame_size,
            options.max_queue_len,
            options.max_send_attempts,
        ));
        let keep_alive = Arc::new(
            KeepAliveMonitor::new(Arc::clone(&outbound), options.keep_alive_interval)
                .with_max_missed(options.max_missed_pongs),
        );
        let router = Arc::new(MessageRouter::new(
            Validator::new(options.max_frame_size),
            store.clone(),
            cache.clone(),
            broadcaster.clone(),
            Arc::clone(&outbound),
            keep_alive.liveness(),
            Arc::clone(&telemetry),
        ));

        let link: Arc<dyn Link> = match options.mode {
            RuntimeMode::Live => Arc::new(ConnectionManager::new(
                options.endpoint.clone(),
                options.reconnect.clone(),
                self.connector
                    .unwrap_or_else(|| Arc::new(WebSocketConnector)),
                self.credentials
                    .unwrap_or_else(|| Arc::new(TokenCell::new())),
                store.clone(),
                Arc::clone(&outbound),
                keep_alive,
                Arc::clone(&router),
                telemetry,
            )),
            RuntimeMode::Demo => Arc::new(DemoConnection::new(
                Arc::clone(&router),
                store.clone(),
                cache.clone(),
                options.demo_update_interval,
            )),
        };
        tracing::debug!("Built synchronizer in {:?} mode", options.mode);

        // Follows the hub: reconnect requests from any tab, this one included, and frames
        // siblings received
        let mut tasks = TaskManager::new();
        let mut control = broadcaster.control();
        let link_for_listener = Arc::clone(&link);
        let router_for_listener = Arc::clone(&router);
        tasks.spawn(async move {
            use crate::broadcast::TabSignal;
            use tokio::sync::broadcast::error::RecvError;

            router_for_listener.hydrate_from_siblings().await;
            loop {
                match control.recv().await {
                    Ok(TabSignal::Reconnect) => {
                        if let Err(e) = link_for_listener.force_reconnect().await {
                            tracing::error!("Forced reconnect failed: {}", e);
                        }
                    }
                    Ok(TabSignal::Message(published)) => {
                        router_for_listener.mirror(&published).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Hub listener skipped {} signals", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Hub listener finished");
        });

        StateSynchronizer {
            options,
            link,
            router,
            broadcaster,
            store,
            cache,
            outbound,
            tasks: Mutex::new(tasks),
            visibility: Mutex::new(TaskSlot::new()),
        }
    }
}
