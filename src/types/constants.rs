/// Wire strings for the recognized message kinds
pub mod message_kinds {
    pub const INITIAL_DATA: &str = "INITIAL_DATA";
    pub const ROOM_UPDATE: &str = "ROOM_UPDATE";
    pub const PING: &str = "PING";
    pub const ERROR: &str = "ERROR";
    pub const SUBSCRIBE_HOTEL: &str = "SUBSCRIBE_HOTEL";
    pub const DISCONNECT: &str = "DISCONNECT";
}

/// Query parameters embedded in the transport URL
pub mod query_params {
    pub const TOKEN: &str = "token";
    pub const HOTEL_ID: &str = "hotelId";
}

/// Cache key layout
pub mod cache_keys {
    pub const ROOMS_PREFIX: &str = "rooms_";
    pub const LABELS: &str = "room_labels";
}

/// Cache entry format version
pub const CACHE_VERSION: &str = "1.0.0";

/// Development endpoint
pub const DEV_WS_ENDPOINT: &str = "ws://localhost:3000/ws";

/// Name of the cross-tab channel
pub const SYNC_CHANNEL: &str = "websocket_messages";

/// Default keep-alive interval (milliseconds)
pub const KEEP_ALIVE_INTERVAL: u64 = 30_000;

/// Default reconnect backoff (milliseconds)
pub const RECONNECT_INITIAL_DELAY: u64 = 1_000;
pub const RECONNECT_FACTOR: u32 = 2;
pub const RECONNECT_MAX_DELAY: u64 = 30_000;
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Max serialized frame size (bytes)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Cache TTLs (milliseconds)
pub const ROOM_CACHE_TTL: u64 = 5 * 60 * 1000;
pub const LABEL_CACHE_TTL: u64 = 24 * 60 * 60 * 1000;

/// Max outbound queue size
pub const MAX_QUEUE_LEN: usize = 1000;

/// Transmissions allowed per outbound message before it is given up on
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Demo churn interval (milliseconds)
pub const DEMO_UPDATE_INTERVAL: u64 = 5_000;

/// Visibility change debounce (milliseconds)
pub const VISIBILITY_DEBOUNCE: u64 = 200;

/// Cross-tab channel capacity
pub const BROADCAST_CAPACITY: usize = 256;

/// WebSocket close codes
pub const WS_CLOSE_NORMAL: u16 = 1000;
