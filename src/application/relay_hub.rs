// Relay hub - Fans out every inbound frame to all other connected peers
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Payload forwarded verbatim between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub skipped: usize,
}

/// Open peers and the channels feeding their send loops. Each peer queues
/// without limit, so an open peer never misses a frame.
#[derive(Default)]
pub struct PeerSet {
    peers: HashMap<PeerId, mpsc::UnboundedSender<RelayFrame>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&mut self, id: PeerId, sender: mpsc::UnboundedSender<RelayFrame>) {
        self.peers.insert(id, sender);
    }

    /// Deliver `frame` to every open peer except the sender. A peer that is
    /// already closing is skipped without affecting the others.
    pub fn on_message(&self, from: PeerId, frame: &RelayFrame) -> FanOut {
        let mut fan_out = FanOut::default();

        for (id, sender) in &self.peers {
            if *id == from {
                continue;
            }
            if sender.send(frame.clone()).is_ok() {
                fan_out.delivered += 1;
            } else {
                tracing::debug!("Skipping {}: connection is closing", id);
                fan_out.skipped += 1;
            }
        }

        fan_out
    }

    /// Returns false if the peer was already gone.
    pub fn on_disconnect(&mut self, id: PeerId) -> bool {
        self.peers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

enum RelayEvent {
    Connect {
        id: PeerId,
        sender: mpsc::UnboundedSender<RelayFrame>,
    },
    Message {
        from: PeerId,
        frame: RelayFrame,
    },
    Disconnect {
        id: PeerId,
    },
    PeerCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle onto the hub task that owns the [`PeerSet`].
///
/// Sessions never touch the set directly: every change and every broadcast
/// goes through one ordered event channel, so frames from a single sender
/// reach each receiver in arrival order.
#[derive(Clone)]
pub struct RelayHub {
    events: mpsc::UnboundedSender<RelayEvent>,
    next_id: Arc<AtomicU64>,
}

impl RelayHub {
    /// Spawn the hub task. It runs until every handle has been dropped.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_hub(events_rx));
        let hub = Self {
            events: events_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, task)
    }

    /// Register a new peer and return the receiver its send loop drains.
    pub fn connect(&self) -> (PeerId, mpsc::UnboundedReceiver<RelayFrame>) {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.post(RelayEvent::Connect { id, sender });
        (id, receiver)
    }

    pub fn publish(&self, from: PeerId, frame: RelayFrame) {
        self.post(RelayEvent::Message { from, frame });
    }

    pub fn disconnect(&self, id: PeerId) {
        self.post(RelayEvent::Disconnect { id });
    }

    pub async fn peer_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.post(RelayEvent::PeerCount { reply });
        rx.await.unwrap_or(0)
    }

    fn post(&self, event: RelayEvent) {
        if self.events.send(event).is_err() {
            tracing::error!("Relay hub has stopped");
        }
    }
}

async fn run_hub(mut events: mpsc::UnboundedReceiver<RelayEvent>) {
    let mut peers = PeerSet::new();

    while let Some(event) = events.recv().await {
        match event {
            RelayEvent::Connect { id, sender } => {
                peers.on_connect(id, sender);
                tracing::info!("Client connected: {} ({} connected)", id, peers.len());
            }
            RelayEvent::Message { from, frame } => {
                let fan_out = peers.on_message(from, &frame);
                tracing::debug!(
                    "Relayed frame from {} to {} peers ({} skipped)",
                    from,
                    fan_out.delivered,
                    fan_out.skipped
                );
            }
            RelayEvent::Disconnect { id } => {
                if peers.on_disconnect(id) {
                    tracing::info!("Client disconnected: {} ({} connected)", id, peers.len());
                    if peers.is_empty() {
                        tracing::debug!("No clients connected");
                    }
                }
            }
            RelayEvent::PeerCount { reply } => {
                let _ = reply.send(peers.len());
            }
        }
    }

    tracing::debug!("Relay hub stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> RelayFrame {
        RelayFrame::Text(s.to_string())
    }

    #[test]
    fn test_fan_out_skips_sender() {
        let mut peers = PeerSet::new();
        let mut receivers = Vec::new();
        for n in 1..=4 {
            let (tx, rx) = mpsc::unbounded_channel();
            peers.on_connect(PeerId(n), tx);
            receivers.push(rx);
        }

        let fan_out = peers.on_message(PeerId(2), &text("hello"));
        assert_eq!(fan_out, FanOut { delivered: 3, skipped: 0 });

        for (index, rx) in receivers.iter_mut().enumerate() {
            if index == 1 {
                assert!(rx.try_recv().is_err());
            } else {
                assert_eq!(rx.try_recv().unwrap(), text("hello"));
                assert!(rx.try_recv().is_err());
            }
        }
    }

    #[test]
    fn test_disconnect_removes_peer_and_is_idempotent() {
        let mut peers = PeerSet::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        peers.on_connect(PeerId(1), tx_a);
        peers.on_connect(PeerId(2), tx_b);

        assert!(peers.on_disconnect(PeerId(2)));
        assert!(!peers.on_disconnect(PeerId(2)));

        let fan_out = peers.on_message(PeerId(1), &text("after"));
        assert_eq!(fan_out.delivered, 0);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_closed_peer_does_not_block_others() {
        let mut peers = PeerSet::new();
        let (tx_closed, rx_closed) = mpsc::unbounded_channel();
        let (tx_ok, mut rx_ok) = mpsc::unbounded_channel();
        let (tx_sender, _rx_sender) = mpsc::unbounded_channel();
        drop(rx_closed);

        peers.on_connect(PeerId(1), tx_closed);
        peers.on_connect(PeerId(3), tx_ok);
        peers.on_connect(PeerId(4), tx_sender);

        let fan_out = peers.on_message(PeerId(4), &RelayFrame::Binary(vec![1, 2, 3]));
        assert_eq!(fan_out, FanOut { delivered: 1, skipped: 1 });
        assert_eq!(rx_ok.try_recv().unwrap(), RelayFrame::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn test_slow_open_peer_receives_every_frame() {
        let mut peers = PeerSet::new();
        let (tx_slow, mut rx_slow) = mpsc::unbounded_channel();
        let (tx_sender, _rx_sender) = mpsc::unbounded_channel();
        peers.on_connect(PeerId(1), tx_slow);
        peers.on_connect(PeerId(2), tx_sender);

        // Nothing is drained while the backlog builds up
        for n in 0..1_000 {
            let fan_out = peers.on_message(PeerId(2), &text(&n.to_string()));
            assert_eq!(fan_out, FanOut { delivered: 1, skipped: 0 });
        }

        for n in 0..1_000 {
            assert_eq!(rx_slow.try_recv().unwrap(), text(&n.to_string()));
        }
        assert!(rx_slow.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hub_preserves_order_per_sender() {
        let (hub, _task) = RelayHub::spawn();
        let (source, _source_rx) = hub.connect();
        let (_viewer, mut viewer_rx) = hub.connect();

        for n in 0..10 {
            hub.publish(source, text(&n.to_string()));
        }

        for n in 0..10 {
            assert_eq!(viewer_rx.recv().await, Some(text(&n.to_string())));
        }
        assert_eq!(hub.peer_count().await, 2);

        hub.disconnect(source);
        hub.disconnect(source);
        assert_eq!(hub.peer_count().await, 1);
    }
}
