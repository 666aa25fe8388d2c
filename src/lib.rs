//! # roomsync
//!
//! Real-time room state for the hotel live dashboard: a reconnecting connection to the room
//! status endpoint, a versioned TTL cache, and fan-out of every update to all views sharing a
//! broadcast hub.
//!
//! ## Example
//!
//! ```no_run
//! use roomsync::{StateSynchronizerBuilder, StaticToken, SyncOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sync = StateSynchronizerBuilder::new(SyncOptions::from_env())
//!         .token_source(Arc::new(StaticToken::new("your-token")))
//!         .build();
//!
//!     sync.store().set_selected_hotel(Some("hotel1".to_string())).await;
//!     sync.connect().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod cache;
pub mod client;
pub mod demo;
pub mod infrastructure;
pub mod messaging;
pub mod store;
pub mod types;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_support;

pub use broadcast::{BroadcastHub, CrossTabBroadcaster, Subscription};
pub use cache::{FileStore, KeyValueStore, LocalCache, MemoryStore};
pub use client::{
    ConnectionState, RuntimeMode, SendOutcome, StateSynchronizer, StateSynchronizerBuilder,
    StaticToken, SyncOptions, TokenCell, TokenSource, Visibility,
};
pub use messaging::MessageKind;
pub use store::{LiveState, LiveStore};
pub use types::{Envelope, LabelMap, Room, RoomUpdate, SyncError};
