use crate::infrastructure::clock::now_ms;
use crate::types::Envelope;
use crate::websocket::Outgoing;
use indexmap::IndexMap;
use std::collections::VecDeque;
use tokio::sync::{Mutex, mpsc};

/// Result of handing a message to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the open transport and tracked until acknowledged
    Sent,
    /// Held in the FIFO until the next successful connection
    Queued,
}

/// A message that reached the transport but has not been acknowledged yet
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub message: Envelope,
    pub timestamp: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    envelope: Envelope,
    attempts: u32,
}

#[derive(Default)]
struct OutboundState {
    writer: Option<mpsc::UnboundedSender<Outgoing>>,
    queue: VecDeque<QueuedMessage>,
    pending: IndexMap<String, PendingMessage>,
}

/// Buffers outbound messages while the transport is unavailable and tracks unacknowledged
/// sends for replay.
///
/// The transport writer is attached and detached by the connection manager; everything else
/// goes through [`OutboundQueue::send`]. Holding one lock across attach-and-drain guarantees
/// queued messages leave before anything sent after the connection opened.
pub struct OutboundQueue {
    max_frame_size: usize,
    max_queue_len: usize,
    max_send_attempts: u32,
    state: Mutex<OutboundState>,
}

impl OutboundQueue {
    pub fn new(max_frame_size: usize, max_queue_len: usize, max_send_attempts: u32) -> Self {
        Self {
            max_frame_size,
            max_queue_len,
            max_send_attempts,
            state: Mutex::new(OutboundState::default()),
        }
    }

    /// Transmits immediately when a transport is attached, otherwise queues.
    ///
    /// Encoding failures (including oversized frames) re-queue the message rather than drop it.
    pub async fn send(&self, envelope: Envelope) -> SendOutcome {
        let mut state = self.state.lock().await;
        self.dispatch(
            &mut state,
            QueuedMessage {
                envelope,
                attempts: 0,
            },
        )
    }

    /// Transmits only if a transport is attached; never queued, never tracked.
    pub async fn send_transient(&self, envelope: Envelope) -> bool {
        let mut state = self.state.lock().await;
        let Some(writer) = state.writer.clone() else {
            return false;
        };
        let json = match envelope.encode(self.max_frame_size) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Dropping transient {}: {}", envelope.kind, e);
                return false;
            }
        };
        if writer.send(Outgoing::Text(json)).is_err() {
            state.writer = None;
            return false;
        }
        true
    }

    /// Attaches an open transport and drains the FIFO into it, in order.
    /// Returns how many queued messages were transmitted.
    pub async fn attach(&self, writer: mpsc::UnboundedSender<Outgoing>) -> usize {
        let mut state = self.state.lock().await;
        state.writer = Some(writer);

        let drained = std::mem::take(&mut state.queue);
        let total = drained.len();
        let mut sent = 0;
        for message in drained {
            if self.dispatch(&mut state, message) == SendOutcome::Sent {
                sent += 1;
            }
        }
        if total > 0 {
            tracing::info!("Flushed {}/{} queued messages", sent, total);
        }
        sent
    }

    /// Detaches after the transport was lost. Unacknowledged replayable messages move back to
    /// the head of the FIFO in their original order. Returns how many were scheduled for replay.
    pub async fn suspend(&self) -> usize {
        let mut state = self.state.lock().await;
        if let Some(writer) = state.writer.take() {
            let _ = writer.send(Outgoing::Close);
        }

        let pending = std::mem::take(&mut state.pending);
        let mut replay = Vec::new();
        for (id, record) in pending {
            if !record.message.kind.is_replayable() {
                continue;
            }
            if record.attempts >= self.max_send_attempts {
                tracing::warn!(
                    "Giving up on {} {} after {} attempts",
                    record.message.kind,
                    id,
                    record.attempts
                );
                continue;
            }
            replay.push(QueuedMessage {
                envelope: record.message,
                attempts: record.attempts,
            });
        }

        let replayed = replay.len();
        for message in replay.into_iter().rev() {
            state.queue.push_front(message);
        }
        if replayed > 0 {
            tracing::info!("{} unacknowledged messages will be replayed", replayed);
        }
        replayed
    }

    /// Deliberate teardown: closes the transport and forgets unacknowledged sends.
    /// Queued (never sent) messages are kept for the next connection.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(writer) = state.writer.take() {
            let _ = writer.send(Outgoing::Close);
        }
        state.pending.clear();
    }

    /// Drops every message still waiting for a connection. Returns how many were dropped.
    pub async fn discard_queued(&self) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state.queue.len();
        state.queue.clear();
        if dropped > 0 {
            tracing::info!("Discarded {} queued messages", dropped);
        }
        dropped
    }

    /// Asks the attached transport to close; the resulting close event drives recovery.
    pub async fn close_transport(&self) {
        let state = self.state.lock().await;
        if let Some(writer) = state.writer.as_ref() {
            let _ = writer.send(Outgoing::Close);
        }
    }

    /// Removes a pending record. Returns whether `message_id` was pending.
    pub async fn acknowledge(&self, message_id: &str) -> bool {
        self.state
            .lock()
            .await
            .pending
            .shift_remove(message_id)
            .is_some()
    }

    pub async fn is_attached(&self) -> bool {
        self.state
            .lock()
            .await
            .writer
            .as_ref()
            .is_some_and(|w| !w.is_closed())
    }

    pub async fn queued_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Snapshot of the FIFO, head first
    pub async fn queued(&self) -> Vec<Envelope> {
        self.state
            .lock()
            .await
            .queue
            .iter()
            .map(|m| m.envelope.clone())
            .collect()
    }

    /// Snapshot of unacknowledged sends, oldest first
    pub async fn pending(&self) -> Vec<PendingMessage> {
        self.state.lock().await.pending.values().cloned().collect()
    }

    fn dispatch(&self, state: &mut OutboundState, message: QueuedMessage) -> SendOutcome {
        let Some(writer) = state.writer.clone() else {
            self.enqueue(state, message);
            return SendOutcome::Queued;
        };

        let json = match message.envelope.encode(self.max_frame_size) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(
                    "Failed to encode {} {}, re-queued: {}",
                    message.envelope.kind,
                    message.envelope.message_id,
                    e
                );
                self.enqueue(state, message);
                return SendOutcome::Queued;
            }
        };

        if writer.send(Outgoing::Text(json)).is_err() {
            tracing::debug!("Transport gone while sending, re-queued");
            state.writer = None;
            self.enqueue(state, message);
            return SendOutcome::Queued;
        }

        tracing::debug!(
            "Sent {} {}",
            message.envelope.kind,
            message.envelope.message_id
        );
        let id = message.envelope.message_id.clone();
        state.pending.insert(
            id,
            PendingMessage {
                message: message.envelope,
                timestamp: now_ms(),
                attempts: message.attempts + 1,
            },
        );
        SendOutcome::Sent
    }

    fn enqueue(&self, state: &mut OutboundState, message: QueuedMessage) {
        while state.queue.len() >= self.max_queue_len.max(1) {
            if let Some(dropped) = state.queue.pop_front() {
                tracing::warn!(
                    "Outbound queue full, dropping oldest {} {}",
                    dropped.envelope.kind,
                    dropped.envelope.message_id
                );
            }
        }
        state.queue.push_back(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessageKind;
    use crate::types::{MAX_FRAME_SIZE, RoomUpdate};

    fn queue() -> OutboundQueue {
        OutboundQueue::new(MAX_FRAME_SIZE, 1000, 3)
    }

    fn update(id: &str) -> Envelope {
        Envelope::room_update(&RoomUpdate::new(id, false)).unwrap()
    }

    fn drain_texts(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(command) = rx.try_recv() {
            if let Outgoing::Text(text) = command {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_send_while_detached_queues_without_error() {
        let queue = queue();
        assert_eq!(queue.send(update("1")).await, SendOutcome::Queued);
        assert_eq!(queue.send(update("2")).await, SendOutcome::Queued);
        assert_eq!(queue.queued_len().await, 2);
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_discard_queued_empties_fifo() {
        let queue = queue();
        queue.send(update("1")).await;
        queue.send(update("2")).await;
        assert_eq!(queue.discard_queued().await, 2);

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(queue.attach(tx).await, 0);
        assert!(drain_texts(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_attach_flushes_in_fifo_order() {
        let queue = queue();
        let first = update("1");
        let second = update("2");
        let third = update("3");
        queue.send(first.clone()).await;
        queue.send(second.clone()).await;
        queue.send(third.clone()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(queue.attach(tx).await, 3);

        let sent = drain_texts(&mut rx);
        assert_eq!(sent, vec![first, second, third]);
        assert_eq!(queue.queued_len().await, 0);
        assert_eq!(queue.pending_len().await, 3);
    }

    #[tokio::test]
    async fn test_acknowledge_removes_pending() {
        let queue = queue();
        let (tx, _rx) = mpsc::unbounded_channel();
        queue.attach(tx).await;

        let envelope = update("1");
        assert_eq!(queue.send(envelope.clone()).await, SendOutcome::Sent);
        assert!(queue.acknowledge(&envelope.message_id).await);
        assert!(!queue.acknowledge(&envelope.message_id).await);
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_oversized_message_is_requeued_not_dropped() {
        let queue = OutboundQueue::new(128, 1000, 3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.attach(tx).await;

        let big = Envelope::error("x".repeat(512));
        assert_eq!(queue.send(big.clone()).await, SendOutcome::Queued);
        assert_eq!(queue.queued().await, vec![big]);
        assert!(drain_texts(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_closed_writer_requeues() {
        let queue = queue();
        let (tx, rx) = mpsc::unbounded_channel();
        queue.attach(tx).await;
        drop(rx);

        assert!(!queue.is_attached().await);
        assert_eq!(queue.send(update("1")).await, SendOutcome::Queued);
        assert_eq!(queue.queued_len().await, 1);
    }

    #[tokio::test]
    async fn test_queue_cap_drops_oldest() {
        let queue = OutboundQueue::new(MAX_FRAME_SIZE, 2, 3);
        let a = update("a");
        let b = update("b");
        let c = update("c");
        queue.send(a).await;
        queue.send(b.clone()).await;
        queue.send(c.clone()).await;
        assert_eq!(queue.queued().await, vec![b, c]);
    }

    #[tokio::test]
    async fn test_suspend_replays_unacknowledged_updates_first() {
        let queue = queue();
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.attach(tx).await;

        let sent_a = update("a");
        let sent_b = update("b");
        queue.send(sent_a.clone()).await;
        queue.send(Envelope::subscribe_hotel("hotel1")).await;
        queue.send(sent_b.clone()).await;
        drain_texts(&mut rx);

        assert_eq!(queue.suspend().await, 2);
        assert_eq!(rx.try_recv().ok(), Some(Outgoing::Close));

        let later = update("c");
        queue.send(later.clone()).await;

        let queued = queue.queued().await;
        assert_eq!(queued, vec![sent_a, sent_b, later]);
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_replay_gives_up_after_max_attempts() {
        let queue = OutboundQueue::new(MAX_FRAME_SIZE, 1000, 2);
        queue.send(update("a")).await;

        for _ in 0..2 {
            let (tx, _rx) = mpsc::unbounded_channel();
            queue.attach(tx).await;
            queue.suspend().await;
        }
        assert_eq!(queue.queued_len().await, 0);
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_forgets_pending_but_keeps_queue() {
        let queue = queue();
        queue.send(update("queued")).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.attach(tx).await;
        queue.send(update("sent")).await;
        queue.send(update("third")).await;
        queue.shutdown().await;

        assert_eq!(queue.pending_len().await, 0);
        assert!(!queue.is_attached().await);
        let commands: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(commands.last(), Some(&Outgoing::Close));

        queue.send(update("after")).await;
        assert_eq!(queue.queued_len().await, 1);
    }

    #[tokio::test]
    async fn test_transient_send_is_not_tracked() {
        let queue = queue();
        assert!(!queue.send_transient(Envelope::ping()).await);
        assert_eq!(queue.queued_len().await, 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.attach(tx).await;
        assert!(queue.send_transient(Envelope::ping()).await);
        assert_eq!(queue.pending_len().await, 0);
        let sent = drain_texts(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Ping);
    }
}
