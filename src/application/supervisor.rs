// Connection supervisor - Owns the upstream connection and its reconnect cycle
use crate::application::transport::{Connector, Transport, TransportFrame};
use crate::domain::connection::ConnectionState;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// How long to wait between connection attempts.
///
/// The default is a fixed one second interval retried forever. A
/// `backoff_factor` above 1.0 stretches the delay after consecutive failed
/// connects, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }

    /// Delay before the next attempt, given the number of consecutive failed
    /// connects. A connection that reached Open resets the count to zero.
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 || self.backoff_factor <= 1.0 {
            return self.delay;
        }
        let scaled = self.delay.as_secs_f64() * self.backoff_factor.powi(failures.min(64) as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    pub fn gives_up_after(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Wait before the very first connect
    pub connect_delay: Duration,
    pub topic: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_secs(1),
            topic: "all".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Handshake written once every time the connection opens
pub fn subscribe_frame(topic: &str) -> String {
    serde_json::json!({ "type": "subscribe", "topic": topic }).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    State(ConnectionState),
    Frame(TransportFrame),
    /// The reconnect policy ran out of attempts; no event follows
    GaveUp { attempts: u32 },
}

/// Cloneable write handle onto a running supervisor.
#[derive(Clone)]
pub struct SupervisorLink {
    outbound: mpsc::UnboundedSender<String>,
    state: watch::Receiver<ConnectionState>,
}

impl SupervisorLink {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Queue a text frame for the open connection. Returns false, after
    /// logging, when there is no open connection to write to.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        if !self.is_connected() {
            tracing::warn!("Upstream connection is not open, dropping outbound message");
            return false;
        }
        if self.outbound.send(payload.into()).is_err() {
            tracing::warn!("Connection supervisor has stopped, dropping outbound message");
            return false;
        }
        true
    }
}

pub struct ConnectionSupervisor {
    link: SupervisorLink,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionSupervisor {
    /// Spawn the supervisor task. The returned receiver carries state changes
    /// and inbound frames in the order they happened.
    pub fn start(
        connector: Arc<dyn Connector>,
        settings: SupervisorSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = SupervisorTask {
            connector,
            subscribe: subscribe_frame(&settings.topic),
            settings,
            state: state_tx,
            events: events_tx,
        };
        let handle = tokio::spawn(task.run(outbound_rx, shutdown_rx));

        let supervisor = Self {
            link: SupervisorLink {
                outbound: outbound_tx,
                state: state_rx,
            },
            shutdown: shutdown_tx,
            task: Some(handle),
        };
        (supervisor, events_rx)
    }

    pub fn link(&self) -> SupervisorLink {
        self.link.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Resolves once the supervisor task has exited, either through teardown
    /// or because it gave up reconnecting.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut state = self.link.state.clone();
        async move { while state.changed().await.is_ok() {} }
    }

    /// Cancel whichever timer is pending, close the open transport and wait
    /// for the task to finish. Returns false if already torn down.
    pub async fn teardown(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            tracing::warn!("Connection supervisor task failed: {}", e);
        }
        true
    }
}

enum SessionEnd {
    Closed,
    Shutdown,
}

struct SupervisorTask {
    connector: Arc<dyn Connector>,
    settings: SupervisorSettings,
    subscribe: String,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl SupervisorTask {
    async fn run(
        self,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut delay = self.settings.connect_delay;
        let mut failures = 0u32;

        loop {
            if !sleep_or_cancel(delay, &mut shutdown).await {
                break;
            }

            self.transition(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(transport) => {
                    failures = 0;
                    let end = self
                        .run_session(transport, &mut outbound, &mut shutdown)
                        .await;
                    if let SessionEnd::Shutdown = end {
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!("Upstream connect attempt {} failed: {}", failures, e);
                }
            }

            self.transition(ConnectionState::Closed);

            if self.settings.reconnect.gives_up_after(failures) {
                tracing::error!("Giving up after {} failed connection attempts", failures);
                let _ = self.events.send(SupervisorEvent::GaveUp { attempts: failures });
                return;
            }
            delay = self.settings.reconnect.delay_after(failures);
            tracing::info!("Reconnecting in {:?}", delay);
        }

        self.transition(ConnectionState::Closed);
        tracing::debug!("Connection supervisor stopped");
    }

    async fn run_session(
        &self,
        transport: Transport,
        outbound: &mut mpsc::UnboundedReceiver<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        // Messages still queued from the previous connection are not replayed
        let mut stale = 0usize;
        while outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!("Discarded {} outbound messages from a closed connection", stale);
        }

        self.transition(ConnectionState::Open);
        tracing::info!("Connected upstream, subscribing to '{}'", self.settings.topic);
        if let Err(e) = sink.send(TransportFrame::Text(self.subscribe.clone())).await {
            tracing::warn!("Failed to send subscribe request: {}", e);
            return SessionEnd::Closed;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancelled(shutdown) => {
                    if let Err(e) = sink.close().await {
                        tracing::debug!("Error while closing upstream connection: {}", e);
                    }
                    return SessionEnd::Shutdown;
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(TransportFrame::Close)) | None => {
                        tracing::info!("Upstream connection closed");
                        return SessionEnd::Closed;
                    }
                    Some(Ok(frame)) => {
                        let _ = self.events.send(SupervisorEvent::Frame(frame));
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Upstream connection error: {}", e);
                        return SessionEnd::Closed;
                    }
                },
                Some(payload) = outbound.recv() => {
                    if let Err(e) = sink.send(TransportFrame::Text(payload)).await {
                        tracing::warn!("Failed to write to upstream connection: {}", e);
                        return SessionEnd::Closed;
                    }
                }
            }
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!("Connection state {} -> {}", previous, next);
            let _ = self.events.send(SupervisorEvent::State(next));
        }
    }
}

/// Resolves once teardown is requested or the owning supervisor is dropped.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn sleep_or_cancel(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = cancelled(shutdown) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::memory::MemoryConnector;
    use tokio::time::Instant;

    fn settings() -> SupervisorSettings {
        SupervisorSettings::default()
    }

    fn assert_subscribe(frame: Option<TransportFrame>) {
        let Some(TransportFrame::Text(text)) = frame else {
            panic!("expected a subscribe frame, got {:?}", frame);
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({ "type": "subscribe", "topic": "all" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_after_initial_delay_and_subscribes() {
        let (connector, mut remotes) = MemoryConnector::with_sessions(1);
        let started = Instant::now();
        let (mut supervisor, mut events) = ConnectionSupervisor::start(Arc::new(connector), settings());
        assert_eq!(supervisor.state(), ConnectionState::Idle);

        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Connecting)));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Open)));
        assert!(supervisor.is_connected());

        assert_subscribe(remotes[0].from_client.next().await);

        supervisor.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cycle_resends_subscribe() {
        let (connector, remotes) = MemoryConnector::with_sessions(2);
        let mut remotes = remotes.into_iter();
        let first = remotes.next().unwrap();
        let mut second = remotes.next().unwrap();

        let (mut supervisor, mut events) = ConnectionSupervisor::start(Arc::new(connector), settings());
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Connecting)));
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Open)));

        let mut first_from_client = first.from_client;
        assert_subscribe(first_from_client.next().await);

        // Remote hangs up
        drop(first.to_client);
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Closed)));
        assert!(!supervisor.is_connected());
        let closed_at = Instant::now();

        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Connecting)));
        assert!(closed_at.elapsed() >= Duration::from_secs(1));
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Open)));
        assert_subscribe(second.from_client.next().await);

        supervisor.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frames_are_forwarded_in_order() {
        let (connector, mut remotes) = MemoryConnector::with_sessions(1);
        let (mut supervisor, mut events) = ConnectionSupervisor::start(Arc::new(connector), settings());
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Connecting)));
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Open)));

        let remote = &mut remotes[0];
        for text in ["one", "two"] {
            remote
                .to_client
                .unbounded_send(Ok(TransportFrame::Text(text.to_string())))
                .unwrap();
        }
        remote
            .to_client
            .unbounded_send(Ok(TransportFrame::Binary(b"three".to_vec())))
            .unwrap();

        assert_eq!(events.recv().await, Some(SupervisorEvent::Frame(TransportFrame::Text("one".into()))));
        assert_eq!(events.recv().await, Some(SupervisorEvent::Frame(TransportFrame::Text("two".into()))));
        assert_eq!(
            events.recv().await,
            Some(SupervisorEvent::Frame(TransportFrame::Binary(b"three".to_vec())))
        );

        supervisor.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_is_noop_unless_open() {
        let (connector, mut remotes) = MemoryConnector::with_sessions(1);
        let (mut supervisor, mut events) = ConnectionSupervisor::start(Arc::new(connector), settings());

        assert!(!supervisor.link().send("pit"));

        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Connecting)));
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Open)));
        assert!(supervisor.link().send("pit"));

        let remote = &mut remotes[0];
        assert_subscribe(remote.from_client.next().await);
        assert_eq!(remote.from_client.next().await, Some(TransportFrame::Text("pit".into())));

        supervisor.teardown().await;
        assert!(!supervisor.link().send("off"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let connector = Arc::new(MemoryConnector::default());
        let mut policy = ReconnectPolicy::fixed(Duration::from_millis(500));
        policy.max_attempts = Some(2);
        let settings = SupervisorSettings {
            reconnect: policy,
            ..SupervisorSettings::default()
        };

        let (mut supervisor, mut events) = ConnectionSupervisor::start(connector.clone(), settings);
        let mut states = Vec::new();
        let mut last = None;
        while let Some(event) = events.recv().await {
            if let SupervisorEvent::State(state) = &event {
                states.push(*state);
            }
            last = Some(event);
        }
        assert_eq!(last, Some(SupervisorEvent::GaveUp { attempts: 2 }));
        supervisor.stopped().await;

        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Closed,
                ConnectionState::Connecting,
                ConnectionState::Closed,
            ]
        );
        assert_eq!(connector.attempts(), 2);
        assert!(supervisor.teardown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_during_initial_delay_cancels_connect() {
        let connector = Arc::new(MemoryConnector::default());
        let (mut supervisor, _events) = ConnectionSupervisor::start(connector.clone(), settings());

        assert!(supervisor.teardown().await);
        assert!(!supervisor.teardown().await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts(), 0);
        assert_eq!(supervisor.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_closes_open_transport() {
        let (connector, mut remotes) = MemoryConnector::with_sessions(1);
        let (mut supervisor, mut events) = ConnectionSupervisor::start(Arc::new(connector), settings());
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Connecting)));
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Open)));

        assert!(supervisor.teardown().await);
        assert!(!supervisor.teardown().await);

        let remote = &mut remotes[0];
        assert_subscribe(remote.from_client.next().await);
        assert_eq!(remote.from_client.next().await, None);
        assert_eq!(events.recv().await, Some(SupervisorEvent::State(ConnectionState::Closed)));
        assert_eq!(events.recv().await, None);
    }

    #[test]
    fn test_reconnect_policy_delays() {
        let fixed = ReconnectPolicy::default();
        assert_eq!(fixed.delay_after(0), Duration::from_secs(1));
        assert_eq!(fixed.delay_after(7), Duration::from_secs(1));
        assert!(!fixed.gives_up_after(1_000));

        let backoff = ReconnectPolicy {
            delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: Some(3),
        };
        assert_eq!(backoff.delay_after(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_after(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_after(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_after(3), Duration::from_secs(5));
        assert_eq!(backoff.delay_after(40), Duration::from_secs(5));
        assert!(!backoff.gives_up_after(2));
        assert!(backoff.gives_up_after(3));
    }
}
