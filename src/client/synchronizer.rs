use super::{ConnectionState, Link, OutboundQueue, SendOutcome, SyncOptions, Visibility};
use crate::broadcast::{CrossTabBroadcaster, Subscription};
use crate::cache::LocalCache;
use crate::infrastructure::{TaskManager, TaskSlot};
use crate::messaging::MessageRouter;
use crate::store::LiveStore;
use crate::types::{Envelope, Result, RoomUpdate};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Keeps the live room view in sync for one hotel at a time.
///
/// `StateSynchronizer` owns the connection (or the demo feed), applies every inbound frame to the
/// [`LiveStore`] and the [`LocalCache`], and republishes it to every synchronizer attached to the
/// same [`BroadcastHub`](crate::broadcast::BroadcastHub).
///
/// # Example
///
/// ```no_run
/// use roomsync::{StateSynchronizerBuilder, StaticToken, SyncOptions};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sync = StateSynchronizerBuilder::new(SyncOptions::from_env())
///     .token_source(Arc::new(StaticToken::new("my-token")))
///     .build();
///
/// sync.store().set_selected_hotel(Some("hotel1".to_string())).await;
/// sync.connect().await?;
///
/// let mut updates = sync.subscribe().await;
/// while let Some(envelope) = updates.recv().await {
///     println!("{} {}", envelope.kind, envelope.payload);
/// }
/// # Ok(())
/// # }
/// ```
pub struct StateSynchronizer {
    pub(crate) options: SyncOptions,
    pub(crate) link: Arc<dyn Link>,
    pub(crate) router: Arc<MessageRouter>,
    pub(crate) broadcaster: CrossTabBroadcaster,
    pub(crate) store: LiveStore,
    pub(crate) cache: LocalCache,
    pub(crate) outbound: Arc<OutboundQueue>,
    pub(crate) tasks: Mutex<TaskManager>,
    pub(crate) visibility: Mutex<TaskSlot>,
}

impl StateSynchronizer {
    /// Starts syncing the selected hotel.
    ///
    /// Marks the view as loading until the first snapshot or update lands. In live mode this
    /// opens the connection; in demo mode it serves generated data instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport could not be opened (a reconnect is already scheduled
    /// when that happens) or, in demo mode, if the hotel is unknown.
    pub async fn connect(&self) -> Result<()> {
        self.store.set_loading(true).await;
        self.link.connect().await
    }

    /// Stops syncing. No automatic reconnect follows.
    pub async fn disconnect(&self) -> Result<()> {
        self.link.disconnect().await
    }

    /// Subscribes to every envelope this synchronizer (or a sibling on the same hub) receives.
    /// The latest snapshot for the selected hotel, received here or in another tab, is
    /// delivered first.
    pub async fn subscribe(&self) -> Subscription {
        let hotel_id = self.store.selected_hotel().await;
        self.broadcaster
            .subscribe(self.broadcaster.snapshot_for(hotel_id.as_deref()))
    }

    /// Switches the view to another hotel.
    ///
    /// The current connection is closed, the previous hotel's rooms and queued sends are
    /// dropped, and syncing restarts for `hotel_id`. A snapshot a sibling tab already holds for
    /// that hotel is shown while the connection opens. `None` leaves the synchronizer
    /// disconnected.
    pub async fn select_hotel(&self, hotel_id: Option<String>) -> Result<()> {
        self.link.disconnect().await?;
        self.outbound.discard_queued().await;
        self.store.clear_rooms().await;
        self.store.set_selected_hotel(hotel_id).await;

        let Some(hotel_id) = self.store.selected_hotel().await else {
            tracing::info!("Hotel selection cleared");
            return Ok(());
        };
        tracing::info!("Switching to {}", hotel_id);
        self.router.hydrate_from_siblings().await;
        self.connect().await
    }

    /// Sends a room toggle from the UI, queueing it while offline
    pub async fn send_room_update(&self, update: RoomUpdate) -> Result<SendOutcome> {
        let envelope = Envelope::room_update(&update)?;
        tracing::debug!("Sending update for room {}", update.id);
        self.link.send(envelope).await
    }

    /// Sends an arbitrary envelope through the outbound queue
    pub async fn send(&self, envelope: Envelope) -> Result<SendOutcome> {
        self.link.send(envelope).await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.watch_state()
    }

    /// Asks every synchronizer on the hub, this one included, to reconnect from scratch
    pub fn request_reconnect(&self) {
        self.broadcaster.request_reconnect();
    }

    /// Pauses the connection while the view is hidden and resumes it when shown again.
    /// Changes are debounced; a newer change cancels a pending one.
    pub fn set_visibility(&self, visibility: Visibility) {
        let link = Arc::clone(&self.link);
        let store = self.store.clone();
        let debounce = self.options.visibility_debounce;

        let mut slot = self.visibility.lock().unwrap_or_else(PoisonError::into_inner);
        slot.spawn(async move {
            tokio::time::sleep(debounce).await;
            let result = match visibility {
                Visibility::Hidden => {
                    tracing::info!("View hidden, pausing sync");
                    link.disconnect().await
                }
                Visibility::Visible => {
                    tracing::info!("View visible, resuming sync");
                    store.set_loading(true).await;
                    link.connect().await
                }
            };
            if let Err(e) = result {
                tracing::warn!("Visibility change to {:?} failed: {}", visibility, e);
            }
        });
    }

    pub fn store(&self) -> &LiveStore {
        &self.store
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Messages waiting for a connection, head first
    pub async fn queued(&self) -> Vec<Envelope> {
        self.outbound.queued().await
    }

    /// Number of background tasks owned directly by the synchronizer
    pub fn background_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for StateSynchronizer {
    fn drop(&mut self) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}
