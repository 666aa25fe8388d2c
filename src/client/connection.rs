use super::{ConnectionState, OutboundQueue, SendOutcome, TokenSource};
use crate::infrastructure::{
    KeepAliveMonitor, ReconnectPolicy, TaskSlot, TelemetryEvent, TelemetrySink, Timer,
};
use crate::messaging::MessageRouter;
use crate::store::LiveStore;
use crate::types::constants::query_params;
use crate::types::{Envelope, Result};
use crate::websocket::{Connector, Outgoing, Transport, TransportEvent};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use url::Url;

/// What the synchronizer drives: either the live connection or the offline demo feed
#[async_trait]
pub trait Link: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    /// Tears the current connection down and connects again with a fresh attempt budget
    async fn force_reconnect(&self) -> Result<()>;
    async fn send(&self, envelope: Envelope) -> Result<SendOutcome>;
    fn state(&self) -> ConnectionState;
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;
}

struct Lifecycle {
    timer: Timer,
    /// Bumped by every connect and teardown; events tagged with an older value are ignored
    generation: u64,
    reconnect: TaskSlot,
    pump: TaskSlot,
    watcher: TaskSlot,
}

struct Inner {
    endpoint: String,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn TokenSource>,
    store: LiveStore,
    outbound: Arc<OutboundQueue>,
    keep_alive: Arc<KeepAliveMonitor>,
    router: Arc<MessageRouter>,
    telemetry: Arc<dyn TelemetrySink>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_tx: mpsc::UnboundedSender<u64>,
    lifecycle: Mutex<Lifecycle>,
}

/// Owns the live transport: opens it with credentials, notices when it goes away and drives
/// the bounded backoff loop that brings it back.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Must be called inside a tokio runtime; spawns the reconnect watcher.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: impl Into<String>,
        policy: ReconnectPolicy,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn TokenSource>,
        store: LiveStore,
        outbound: Arc<OutboundQueue>,
        keep_alive: Arc<KeepAliveMonitor>,
        router: Arc<MessageRouter>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();

        let manager = Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                connector,
                credentials,
                store,
                outbound,
                keep_alive,
                router,
                telemetry,
                state_tx,
                reconnect_tx,
                lifecycle: Mutex::new(Lifecycle {
                    timer: Timer::new(policy),
                    generation: 0,
                    reconnect: TaskSlot::new(),
                    pump: TaskSlot::new(),
                    watcher: TaskSlot::new(),
                }),
            }),
        };
        manager.spawn_watcher(reconnect_rx);
        manager
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Reconnect attempts scheduled since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.lifecycle().timer.attempts()
    }

    pub fn outbound(&self) -> &Arc<OutboundQueue> {
        &self.inner.outbound
    }

    /// Opens the connection for the selected hotel.
    ///
    /// Does nothing while already connecting or connected. A missing hotel selection or token is
    /// logged and leaves the state untouched, so the caller can retry once both are available.
    /// A failed open is handled like a close and schedules the next backoff attempt.
    pub async fn connect(&self) -> Result<()> {
        self.connect_for(None).await
    }

    /// `expected` pins a scheduled reconnect to the generation whose close scheduled it, so a
    /// teardown that lands while the attempt is still preparing wins.
    async fn connect_for(&self, expected: Option<u64>) -> Result<()> {
        if self.state().is_active() {
            tracing::debug!("Already {}, ignoring connect", self.state());
            return Ok(());
        }

        let Some(hotel_id) = self.inner.store.selected_hotel().await else {
            tracing::warn!("No hotel selected, not connecting");
            return Ok(());
        };
        let Some(token) = self.inner.credentials.auth_token() else {
            tracing::warn!("No auth token available, not connecting");
            return Ok(());
        };
        let url = build_endpoint_url(&self.inner.endpoint, &token, &hotel_id)?;

        let generation = {
            let mut lifecycle = self.lifecycle();
            if expected.is_some_and(|generation| generation != lifecycle.generation) {
                tracing::debug!("Reconnect superseded by a later teardown");
                return Ok(());
            }
            let current = self.state();
            if current.is_active() {
                return Ok(());
            }
            if current == ConnectionState::Failed {
                lifecycle.timer.reset();
            }
            lifecycle.generation += 1;
            lifecycle.reconnect.abort();
            self.set_state(ConnectionState::Connecting);
            lifecycle.generation
        };

        tracing::info!("Connecting to {} for {}", self.inner.endpoint, hotel_id);
        let started = Instant::now();

        match self.inner.connector.open(url.as_str()).await {
            Ok(transport) => {
                self.on_open(generation, &hotel_id, transport, started)
                    .await;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to open connection: {}", e);
                self.inner
                    .telemetry
                    .track(TelemetryEvent::new("WebSocket", "Error").with_label(e.to_string()));
                self.handle_close(generation, Some(e.to_string())).await;
                Err(e)
            }
        }
    }

    /// Deliberate teardown. Sends a best-effort `DISCONNECT` notice when connected and never
    /// schedules a reconnect.
    pub async fn disconnect(&self) -> Result<()> {
        let was_connected = {
            let mut lifecycle = self.lifecycle();
            lifecycle.generation += 1;
            lifecycle.reconnect.abort();
            lifecycle.pump.abort();
            self.state() == ConnectionState::Connected
        };

        if was_connected && !self.inner.outbound.send_transient(Envelope::disconnect()).await {
            tracing::debug!("Transport already gone, no disconnect notice sent");
        }
        self.inner.keep_alive.stop();
        self.inner.outbound.shutdown().await;
        self.set_state(ConnectionState::Disconnected);

        tracing::info!("Disconnected");
        Ok(())
    }

    /// Drops whatever connection exists and connects again immediately with a fresh attempt
    /// budget. Unacknowledged updates are kept for replay.
    pub async fn force_reconnect(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle();
            lifecycle.generation += 1;
            lifecycle.reconnect.abort();
            lifecycle.pump.abort();
            lifecycle.timer.reset();
        }
        tracing::info!("Forcing reconnect");

        self.inner.keep_alive.stop();
        self.inner.outbound.suspend().await;
        self.set_state(ConnectionState::Disconnected);
        self.connect().await
    }

    async fn on_open(&self, generation: u64, hotel_id: &str, transport: Transport, started: Instant) {
        let Transport { outgoing, incoming } = transport;
        let closer = outgoing.clone();

        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.generation != generation {
                tracing::debug!("Connection opened after it was abandoned, closing it");
                let _ = closer.send(Outgoing::Close);
                return;
            }
            lifecycle.timer.reset();
            self.inner.router.bind_hotel(Some(hotel_id.to_string()));
            self.set_state(ConnectionState::Connected);
        }
        tracing::info!("Connected");

        self.inner.keep_alive.start();
        self.inner.outbound.attach(outgoing).await;
        if !self
            .inner
            .outbound
            .send_transient(Envelope::subscribe_hotel(hotel_id))
            .await
        {
            tracing::warn!("Could not announce hotel {}", hotel_id);
        }

        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.generation != generation {
                let _ = closer.send(Outgoing::Close);
                return;
            }
            lifecycle
                .pump
                .spawn(pump(Arc::downgrade(&self.inner), incoming, generation));
        }

        self.inner.telemetry.track(
            TelemetryEvent::new("WebSocket", "Connected")
                .with_value(started.elapsed().as_millis() as f64),
        );
    }

    /// Close path for the connection tagged `generation`; stale generations are ignored.
    async fn handle_close(&self, generation: u64, reason: Option<String>) {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.generation != generation {
                return;
            }
            // May be running on the pump itself, which must not abort its own task.
            lifecycle.pump.release();
            lifecycle.reconnect.abort();
        }

        match reason.as_deref() {
            Some(reason) => tracing::warn!("Connection closed: {}", reason),
            None => tracing::warn!("Connection closed"),
        }
        self.inner.keep_alive.stop();
        self.inner.outbound.suspend().await;
        self.set_state(ConnectionState::Disconnected);

        let mut event = TelemetryEvent::new("WebSocket", "Disconnected");
        if let Some(reason) = reason {
            event = event.with_label(reason);
        }
        self.inner.telemetry.track(event);

        self.schedule_reconnect(generation);
    }

    fn schedule_reconnect(&self, generation: u64) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.generation != generation {
            return;
        }

        let Some(delay) = lifecycle.timer.next_delay() else {
            self.set_state(ConnectionState::Failed);
            tracing::error!(
                "Giving up after {} reconnect attempts",
                lifecycle.timer.attempts()
            );
            self.inner
                .telemetry
                .track(TelemetryEvent::new("WebSocket", "Max Reconnect Attempts Reached"));
            return;
        };

        self.set_state(ConnectionState::Reconnecting);
        tracing::info!(
            "Reconnect attempt {} in {:?}",
            lifecycle.timer.attempts(),
            delay
        );

        let tx = self.inner.reconnect_tx.clone();
        lifecycle.reconnect.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(generation);
        });
    }

    /// Runs due reconnects. Connecting from here instead of from the timer keeps the timer
    /// cancellable by aborting it.
    fn spawn_watcher(&self, mut rx: mpsc::UnboundedReceiver<u64>) {
        let weak = Arc::downgrade(&self.inner);
        self.lifecycle().watcher.spawn(async move {
            while let Some(generation) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = ConnectionManager { inner };
                if manager.lifecycle().generation != generation {
                    continue;
                }
                manager.lifecycle().reconnect.release();
                if let Err(e) = manager.connect_for(Some(generation)).await {
                    tracing::debug!("Reconnect attempt failed: {}", e);
                }
            }
        });
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state {} -> {}", previous, state);
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Feeds inbound frames to the router until the transport closes
async fn pump(
    inner: Weak<Inner>,
    mut incoming: mpsc::UnboundedReceiver<TransportEvent>,
    generation: u64,
) {
    let mut reason = Some("transport dropped".to_string());
    while let Some(event) = incoming.recv().await {
        match event {
            TransportEvent::Frame(raw) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                inner.router.route_frame(&raw).await;
            }
            TransportEvent::Closed(closed) => {
                reason = closed;
                break;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        ConnectionManager { inner }
            .handle_close(generation, reason)
            .await;
    }
}

/// Base endpoint plus `token` and `hotelId` query parameters
pub fn build_endpoint_url(endpoint: &str, token: &str, hotel_id: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut()
        .append_pair(query_params::TOKEN, token)
        .append_pair(query_params::HOTEL_ID, hotel_id);
    Ok(url)
}

#[async_trait]
impl Link for ConnectionManager {
    async fn connect(&self) -> Result<()> {
        ConnectionManager::connect(self).await
    }

    async fn disconnect(&self) -> Result<()> {
        ConnectionManager::disconnect(self).await
    }

    async fn force_reconnect(&self) -> Result<()> {
        ConnectionManager::force_reconnect(self).await
    }

    async fn send(&self, envelope: Envelope) -> Result<SendOutcome> {
        Ok(self.inner.outbound.send(envelope).await)
    }

    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        ConnectionManager::watch_state(self)
    }
}
