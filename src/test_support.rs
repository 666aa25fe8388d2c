//! Channel-backed transport for exercising the connection without a network.

use crate::broadcast::BroadcastHub;
use crate::cache::{LocalCache, MemoryStore};
use crate::client::{StateSynchronizer, StateSynchronizerBuilder, StaticToken, SyncOptions};
use crate::infrastructure::{NoopTelemetry, TelemetrySink};
use crate::messaging::MessageKind;
use crate::store::{LiveState, LiveStore};
use crate::types::{Envelope, Result, SyncError};
use crate::websocket::{Connector, Outgoing, Transport, TransportEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Hands the server side of every opened transport to the test
pub(crate) struct MockConnector {
    urls: Mutex<Vec<String>>,
    failing: AtomicBool,
    servers: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            urls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            servers,
        });
        (connector, rx)
    }

    /// Makes subsequent opens fail
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of open attempts, failed ones included
    pub(crate) fn attempts(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> Result<Transport> {
        self.urls.lock().unwrap().push(url.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Connection("connection refused".to_string()));
        }

        let (outgoing, mut commands) = mpsc::unbounded_channel();
        let (events, incoming) = mpsc::unbounded_channel();
        let (seen_tx, seen) = mpsc::unbounded_channel();

        // Behaves like the socket writer: a local close ends the stream and reports it.
        let closed = events.clone();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    Outgoing::Text(text) => {
                        let _ = seen_tx.send(text);
                    }
                    Outgoing::Close => break,
                }
            }
            let _ = closed.send(TransportEvent::Closed(Some("closed locally".to_string())));
        });

        let _ = self.servers.send(MockServer { seen, events });
        Ok(Transport { outgoing, incoming })
    }
}

/// The far end of one mock transport
pub(crate) struct MockServer {
    seen: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockServer {
    /// Next envelope the client sent, skipping keep-alive pings. `None` once the client closed.
    pub(crate) async fn next_frame(&mut self) -> Option<Envelope> {
        while let Some(raw) = self.seen.recv().await {
            let envelope: Envelope = serde_json::from_str(&raw).unwrap();
            if envelope.kind != MessageKind::Ping {
                return Some(envelope);
            }
        }
        None
    }

    /// Next raw frame, pings included
    pub(crate) async fn next_raw(&mut self) -> Option<String> {
        self.seen.recv().await
    }

    pub(crate) fn push(&self, envelope: &Envelope) {
        self.push_raw(&serde_json::to_string(envelope).unwrap());
    }

    pub(crate) fn push_raw(&self, raw: &str) {
        let _ = self.events.send(TransportEvent::Frame(raw.to_string()));
    }

    /// Drops the connection from the server side
    pub(crate) fn close(&self) {
        let _ = self
            .events
            .send(TransportEvent::Closed(Some("server went away".to_string())));
    }
}

/// Waits until the view satisfies `check`, failing after a generous timeout
pub(crate) async fn until(store: &LiveStore, check: impl Fn(&LiveState) -> bool) {
    let mut changes = store.changes();
    let reached = tokio::time::timeout(Duration::from_secs(30), async {
        while !check(&store.snapshot().await) {
            if changes.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    assert!(reached.is_ok(), "view never reached the expected state");
}

pub(crate) struct Harness {
    pub(crate) sync: StateSynchronizer,
    pub(crate) connector: Arc<MockConnector>,
    servers: mpsc::UnboundedReceiver<MockServer>,
}

impl Harness {
    /// Server side of the next transport the client opens
    pub(crate) async fn next_server(&mut self) -> MockServer {
        self.servers.recv().await.unwrap()
    }
}

/// A synchronizer for `hotel1` with a valid token and a mock transport
pub(crate) async fn harness(options: SyncOptions) -> Harness {
    build(options, BroadcastHub::default(), Arc::new(NoopTelemetry)).await
}

/// Like [`harness`], attached to a shared hub so several harnesses act as tabs
pub(crate) async fn harness_on(options: SyncOptions, hub: BroadcastHub) -> Harness {
    build(options, hub, Arc::new(NoopTelemetry)).await
}

pub(crate) async fn harness_with(options: SyncOptions, telemetry: Arc<dyn TelemetrySink>) -> Harness {
    build(options, BroadcastHub::default(), telemetry).await
}

async fn build(options: SyncOptions, hub: BroadcastHub, telemetry: Arc<dyn TelemetrySink>) -> Harness {
    let (connector, servers) = MockConnector::new();
    let store = LiveStore::new();
    store.set_selected_hotel(Some("hotel1".to_string())).await;

    let sync = StateSynchronizerBuilder::new(options)
        .store(store)
        .cache(LocalCache::new(Arc::new(MemoryStore::new())))
        .token_source(Arc::new(StaticToken::new("secret")))
        .hub(hub)
        .connector(connector.clone())
        .telemetry(telemetry)
        .build();

    Harness {
        sync,
        connector,
        servers,
    }
}
