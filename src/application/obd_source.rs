// Synthetic OBD source - Publishes vehicle readings through the relay
use crate::application::supervisor::{SupervisorEvent, SupervisorLink};
use crate::application::transport::TransportFrame;
use crate::domain::command::OutboundCommand;
use crate::domain::telemetry::Metric;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameShape {
    /// All readings of a tick in one object
    #[default]
    Flat,
    /// One `{"command", "value"}` frame per reading
    Command,
}

/// Deterministic stand-in for a car on a short drive cycle.
#[derive(Debug, Default, Clone)]
pub struct SyntheticObd;

impl SyntheticObd {
    pub fn reading(&self, tick: u64) -> Vec<(Metric, f64)> {
        let t = tick as f64;
        // 60 tick drive cycle
        let phase = (t / 60.0 * std::f64::consts::TAU).sin();
        let throttle = (50.0 + 45.0 * phase).clamp(0.0, 100.0);
        let rpm = 800.0 + throttle * 45.0;
        let speed = (throttle * 1.2).max(0.0);
        // Slow swing across the 90 °C mark
        let coolant = 88.0 + 6.0 * (t / 90.0 * std::f64::consts::TAU).sin();

        Metric::ALL
            .into_iter()
            .map(|metric| {
                let value = match metric {
                    Metric::Rpm => rpm,
                    Metric::Speed => speed,
                    Metric::CoolantTemp => coolant,
                    Metric::IntakeTemp => 28.0 + 4.0 * phase,
                    Metric::EngineLoad => throttle * 0.8,
                    Metric::ThrottlePos => throttle,
                    Metric::SupplyVoltage => 13.8 - 0.4 * phase.abs(),
                    Metric::Maf => rpm / 250.0,
                };
                (metric, round(value))
            })
            .collect()
    }
}

fn round(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn encode_flat(readings: &[(Metric, f64)]) -> String {
    let object: Map<String, Value> = readings
        .iter()
        .map(|(metric, value)| (metric.wire_name().to_string(), Value::from(*value)))
        .collect();
    Value::Object(object).to_string()
}

pub fn encode_command(metric: Metric, value: f64) -> String {
    serde_json::json!({ "command": metric.wire_name(), "value": value }).to_string()
}

pub fn encode(shape: FrameShape, readings: &[(Metric, f64)]) -> Vec<String> {
    match shape {
        FrameShape::Flat => vec![encode_flat(readings)],
        FrameShape::Command => readings
            .iter()
            .map(|(metric, value)| encode_command(*metric, *value))
            .collect(),
    }
}

/// Publish one tick of readings per `interval` until `shutdown` flips.
/// Ticks taken while the connection is down are dropped, not queued.
pub async fn run_source(
    link: SupervisorLink,
    source: SyntheticObd,
    shape: FrameShape,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    // A zero period would panic inside tokio
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut tick = 0u64;
    let mut published = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        tick += 1;
        if !link.is_connected() {
            tracing::debug!("Skipping tick {}: relay not connected", tick);
            continue;
        }

        let frames = encode(shape, &source.reading(tick));
        for frame in frames {
            tracing::debug!("Sent: {}", frame);
            if link.send(frame) {
                published += 1;
            }
        }
    }

    tracing::info!("Source stopped after {} frames", published);
    published
}

/// Drain the source's inbound traffic, reporting light commands sent by
/// viewers. Returns how many commands were seen.
pub async fn receive_commands(mut events: mpsc::UnboundedReceiver<SupervisorEvent>) -> usize {
    let mut received = 0;
    while let Some(event) = events.recv().await {
        let SupervisorEvent::Frame(TransportFrame::Text(text)) = event else {
            continue;
        };
        match text.trim().parse::<OutboundCommand>() {
            Ok(command) => {
                received += 1;
                tracing::info!("Received light command: {}", command);
            }
            Err(_) => tracing::debug!("Ignoring relay message: {}", text),
        }
    }
    received
}
