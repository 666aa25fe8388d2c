use crate::client::OutboundQueue;
use crate::infrastructure::TaskSlot;
use crate::types::Envelope;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time;

/// Counts keep-alive intervals that passed without any inbound traffic
#[derive(Debug, Default)]
pub struct Liveness {
    missed: AtomicU32,
}

impl Liveness {
    /// Any inbound frame counts as a pong
    pub fn record_activity(&self) {
        self.missed.store(0, Ordering::Relaxed);
    }

    pub fn missed(&self) -> u32 {
        self.missed.load(Ordering::Relaxed)
    }

    fn record_ping(&self) -> u32 {
        self.missed.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Sends `PING` frames on a fixed interval while a transport is attached.
///
/// Without `max_missed` the pings only keep intermediaries from idling the connection out and
/// the transport's own close events remain the sole failure signal. With `max_missed = Some(n)`,
/// `n` silent intervals in a row close the transport, which drives the normal reconnect path.
pub struct KeepAliveMonitor {
    interval: Duration,
    max_missed: Option<u32>,
    outbound: Arc<OutboundQueue>,
    liveness: Arc<Liveness>,
    task: Mutex<TaskSlot>,
}

impl KeepAliveMonitor {
    pub fn new(outbound: Arc<OutboundQueue>, interval: Duration) -> Self {
        Self {
            interval,
            max_missed: None,
            outbound,
            liveness: Arc::new(Liveness::default()),
            task: Mutex::new(TaskSlot::new()),
        }
    }

    pub fn with_max_missed(mut self, max_missed: Option<u32>) -> Self {
        self.max_missed = max_missed;
        self
    }

    pub fn liveness(&self) -> Arc<Liveness> {
        Arc::clone(&self.liveness)
    }

    /// Arms the repeating ping, replacing any previous one
    pub fn start(&self) {
        self.liveness.record_activity();

        let interval = self.interval;
        let max_missed = self.max_missed;
        let outbound = Arc::clone(&self.outbound);
        let liveness = Arc::clone(&self.liveness);

        self.slot().spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !outbound.is_attached().await {
                    continue;
                }

                if let Some(max) = max_missed
                    && liveness.missed() >= max
                {
                    tracing::warn!(
                        "[KeepAlive] No traffic for {} intervals, closing connection",
                        liveness.missed()
                    );
                    outbound.close_transport().await;
                    continue;
                }

                if outbound.send_transient(Envelope::ping()).await {
                    let missed = liveness.record_ping();
                    tracing::debug!("[KeepAlive] Sent ping ({} unanswered)", missed);
                } else {
                    tracing::debug!("[KeepAlive] Transport not ready, skipping ping");
                }
            }
        });
        tracing::debug!("Keep-alive armed every {:?}", self.interval);
    }

    /// Disarms the ping
    pub fn stop(&self) {
        self.slot().abort();
    }

    pub fn is_running(&self) -> bool {
        self.slot().is_armed()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, TaskSlot> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
