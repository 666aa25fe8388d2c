//! Fan-out of inbound frames to every synchronizer sharing an origin.
//!
//! A [`BroadcastHub`] stands in for the browser's same-origin channel: every synchronizer (one
//! per tab) attaches to the same hub, publishes what it receives, and observes what its siblings
//! receive. The hub also carries a reconnect control signal that is never confused with a
//! business envelope, and remembers the latest snapshot so a tab attached later is not left
//! empty.

use crate::messaging::MessageKind;
use crate::types::{BROADCAST_CAPACITY, Envelope, SYNC_CHANNEL};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// An envelope as seen on the hub, tagged with the tab and hotel it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub origin: u64,
    pub hotel_id: Option<String>,
    pub envelope: Envelope,
}

impl Published {
    /// Whether a tab viewing `hotel_id` may use this frame. Untagged frames belong to everyone.
    pub fn concerns(&self, hotel_id: Option<&str>) -> bool {
        self.hotel_id.is_none() || self.hotel_id.as_deref() == hotel_id
    }
}

/// What travels on the hub
#[derive(Debug, Clone, PartialEq)]
pub enum TabSignal {
    Message(Published),
    /// Every attached synchronizer should drop its connection and reconnect
    Reconnect,
}

/// Shared, named pub/sub channel
#[derive(Clone)]
pub struct BroadcastHub {
    name: Arc<str>,
    tx: broadcast::Sender<TabSignal>,
    latest: Arc<RwLock<Option<Published>>>,
}

impl BroadcastHub {
    pub fn new(name: &str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name: Arc::from(name),
            tx,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// The most recent `INITIAL_DATA` published by any tab
    pub fn latest_snapshot(&self) -> Option<Published> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember(&self, published: Published) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(published);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live receivers, across all tabs
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn post(&self, signal: TabSignal) {
        // No receivers is not an error: nobody is listening yet.
        let _ = self.tx.send(signal);
    }

    fn listen(&self) -> broadcast::Receiver<TabSignal> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(SYNC_CHANNEL, BROADCAST_CAPACITY)
    }
}

/// One synchronizer's attachment to the hub. Clones share the same origin.
#[derive(Clone)]
pub struct CrossTabBroadcaster {
    hub: BroadcastHub,
    origin: u64,
}

impl CrossTabBroadcaster {
    pub fn new(hub: BroadcastHub) -> Self {
        Self {
            hub,
            origin: NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Identifies this tab on the hub
    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Fans `envelope` out to every subscriber, in this tab and the others
    pub fn publish(&self, envelope: Envelope) {
        self.publish_for(None, envelope);
    }

    /// Like [`CrossTabBroadcaster::publish`], tagged with the hotel the frame belongs to so
    /// tabs viewing another hotel leave it alone
    pub fn publish_for(&self, hotel_id: Option<&str>, envelope: Envelope) {
        tracing::trace!("Publishing {} {} on {}", envelope.kind, envelope.message_id, self.hub.name());
        let published = Published {
            origin: self.origin,
            hotel_id: hotel_id.map(str::to_string),
            envelope,
        };
        if published.envelope.kind == MessageKind::InitialData {
            self.hub.remember(published.clone());
        }
        self.hub.post(TabSignal::Message(published));
    }

    /// Latest snapshot any tab received for `hotel_id`
    pub fn snapshot_for(&self, hotel_id: Option<&str>) -> Option<Envelope> {
        self.hub
            .latest_snapshot()
            .filter(|published| published.concerns(hotel_id))
            .map(|published| published.envelope)
    }

    /// Asks every attached synchronizer to reconnect
    pub fn request_reconnect(&self) {
        tracing::info!("Requesting reconnect on {}", self.hub.name());
        self.hub.post(TabSignal::Reconnect);
    }

    /// Subscribes to envelopes; `replay` is delivered first, ahead of anything live.
    /// Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe(&self, replay: Option<Envelope>) -> Subscription {
        Subscription {
            replay,
            rx: self.hub.listen(),
        }
    }

    /// Raw signal stream, used by the synchronizer to react to reconnect requests
    pub fn control(&self) -> broadcast::Receiver<TabSignal> {
        self.hub.listen()
    }
}

/// A live feed of envelopes
pub struct Subscription {
    replay: Option<Envelope>,
    rx: broadcast::Receiver<TabSignal>,
}

impl Subscription {
    /// Next envelope, or `None` once the hub is gone.
    ///
    /// A subscriber that falls more than the hub capacity behind skips the overflow and keeps
    /// going.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if let Some(envelope) = self.replay.take() {
            return Some(envelope);
        }
        loop {
            match self.rx.recv().await {
                Ok(TabSignal::Message(published)) => return Some(published.envelope),
                Ok(TabSignal::Reconnect) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber lagged, skipped {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Option<Envelope> {
        if let Some(envelope) = self.replay.take() {
            return Some(envelope);
        }
        loop {
            match self.rx.try_recv() {
                Ok(TabSignal::Message(published)) => return Some(published.envelope),
                Ok(TabSignal::Reconnect) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber lagged, skipped {} messages", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Hands every envelope to `callback` on a background task until the returned handle is
    /// aborted or the hub goes away.
    pub fn spawn_handler<F>(mut self, mut callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(Envelope) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(envelope) = self.recv().await {
                callback(envelope);
            }
        })
    }
}
