// Telemetry pipeline - Supervisor events through normalization into alerts and the sink
use crate::application::command_channel::CommandChannel;
use crate::application::normalizer::normalize;
use crate::application::supervisor::{ConnectionSupervisor, SupervisorEvent, SupervisorSettings};
use crate::application::telemetry_sink::{AlertNotification, AlertNotifier, TelemetrySink};
use crate::application::transport::{Connector, TransportFrame};
use crate::domain::alert::{AlertEngine, AlertRule, AlertTransition};
use crate::domain::connection::ConnectionState;
use crate::domain::telemetry::TelemetrySample;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub supervisor: SupervisorSettings,
    pub rules: Vec<AlertRule>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            supervisor: SupervisorSettings::default(),
            rules: vec![AlertRule::coolant_default()],
        }
    }
}

pub struct TelemetryPipeline {
    supervisor: ConnectionSupervisor,
    sink: Arc<dyn TelemetrySink>,
    worker: Option<JoinHandle<()>>,
}

impl TelemetryPipeline {
    pub fn start(
        connector: Arc<dyn Connector>,
        settings: PipelineSettings,
        sink: Arc<dyn TelemetrySink>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        let (supervisor, events) = ConnectionSupervisor::start(connector, settings.supervisor);
        let worker = PipelineWorker::new(settings.rules, sink.clone(), notifier);
        let handle = tokio::spawn(worker.run(events));

        Self {
            supervisor,
            sink,
            worker: Some(handle),
        }
    }

    pub fn connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Resolves when the connection supervisor has stopped for good.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        self.supervisor.stopped()
    }

    pub fn commands(&self) -> CommandChannel {
        CommandChannel::new(self.supervisor.link(), self.sink.clone())
    }

    /// Stop the supervisor, then drain the remaining events. Safe to call
    /// more than once.
    pub async fn teardown(&mut self) -> bool {
        let stopped = self.supervisor.teardown().await;
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!("Telemetry pipeline worker failed: {}", e);
            }
        }
        stopped
    }
}

/// Consumes supervisor events in order; owns the sample and the alert latches.
pub(crate) struct PipelineWorker {
    sample: TelemetrySample,
    alerts: AlertEngine,
    sink: Arc<dyn TelemetrySink>,
    notifier: Arc<dyn AlertNotifier>,
}

impl PipelineWorker {
    pub(crate) fn new(
        rules: Vec<AlertRule>,
        sink: Arc<dyn TelemetrySink>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            sample: TelemetrySample::new(),
            alerts: AlertEngine::new(rules),
            sink,
            notifier,
        }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SupervisorEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event, Utc::now());
        }
    }

    pub(crate) fn handle(&mut self, event: SupervisorEvent, now: DateTime<Utc>) {
        match event {
            SupervisorEvent::State(ConnectionState::Open) => self.sink.on_connection(true),
            SupervisorEvent::State(ConnectionState::Closed) => {
                // Monitoring is suspended, not cleared
                let suspended: Vec<String> =
                    self.alerts.active_metrics().map(|m| m.to_string()).collect();
                if !suspended.is_empty() {
                    tracing::info!("Suspending active alerts: {}", suspended.join(", "));
                }
                self.alerts.reset();
                self.sink.on_connection(false);
            }
            SupervisorEvent::State(_) => {}
            SupervisorEvent::GaveUp { attempts } => {
                tracing::error!("Telemetry stopped: relay unreachable after {} attempts", attempts);
            }
            SupervisorEvent::Frame(frame) => self.handle_frame(&frame, now),
        }
    }

    fn handle_frame(&mut self, frame: &TransportFrame, now: DateTime<Utc>) {
        for update in normalize(frame, now) {
            if !self.sample.apply(&update) {
                continue;
            }
            self.sink.on_update(&update, &self.sample);

            match self.alerts.observe(&update) {
                Some(AlertTransition::Triggered { rule, value }) => {
                    tracing::warn!("{} alert raised at {}", rule.metric, value);
                    if rule.audible {
                        self.notifier.sound_alarm();
                    }
                    if rule.notify {
                        self.notifier.notify(&AlertNotification::for_rule(&rule, value));
                    }
                    self.sink.on_alert_flag(&rule, true, value);
                }
                Some(AlertTransition::Cleared { rule, value }) => {
                    tracing::info!("{} alert cleared at {}", rule.metric, value);
                    self.sink.on_alert_flag(&rule, false, value);
                }
                None => {}
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn sample(&self) -> &TelemetrySample {
        &self.sample
    }
}
