// Threshold alert domain model
use super::telemetry::{Metric, MetricUpdate};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertDirection {
    /// Alert while the value is above the threshold
    #[default]
    Above,
    /// Alert while the value is below the threshold
    Below,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub metric: Metric,
    pub threshold: f64,
    pub direction: AlertDirection,
    pub audible: bool,
    pub notify: bool,
}

impl AlertRule {
    pub fn new(metric: Metric, threshold: f64, direction: AlertDirection) -> Self {
        Self {
            metric,
            threshold,
            direction,
            audible: true,
            notify: true,
        }
    }

    /// Coolant above 90 °C, the one rule a fresh install watches.
    pub fn coolant_default() -> Self {
        Self::new(Metric::CoolantTemp, 90.0, AlertDirection::Above)
    }

    pub fn triggers(&self, value: f64) -> bool {
        match self.direction {
            AlertDirection::Above => value > self.threshold,
            AlertDirection::Below => value < self.threshold,
        }
    }

    pub fn clears(&self, value: f64) -> bool {
        !self.triggers(value)
    }

    pub fn title(&self) -> String {
        let label = self.metric.label().to_lowercase();
        match self.direction {
            AlertDirection::Above => format!("High {}", label),
            AlertDirection::Below => format!("Low {}", label),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertState {
    pub active: bool,
    pub threshold: f64,
    pub last_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertTransition {
    Triggered { rule: AlertRule, value: f64 },
    Cleared { rule: AlertRule, value: f64 },
}

/// Latched per-metric alert state machine.
///
/// A rule fires once when its metric crosses the threshold and stays latched
/// until a reading satisfies the clear predicate again.
#[derive(Debug, Clone, Default)]
pub struct AlertEngine {
    watched: BTreeMap<Metric, (AlertRule, AlertState)>,
}

impl AlertEngine {
    pub fn new(rules: impl IntoIterator<Item = AlertRule>) -> Self {
        let mut watched = BTreeMap::new();
        for rule in rules {
            let state = AlertState {
                active: false,
                threshold: rule.threshold,
                last_value: None,
            };
            if watched.insert(rule.metric, (rule, state)).is_some() {
                tracing::warn!("Duplicate alert rule, keeping the last one");
            }
        }
        Self { watched }
    }

    pub fn observe(&mut self, update: &MetricUpdate) -> Option<AlertTransition> {
        let (rule, state) = self.watched.get_mut(&update.metric)?;
        state.last_value = Some(update.value);

        if !state.active && rule.triggers(update.value) {
            state.active = true;
            return Some(AlertTransition::Triggered {
                rule: rule.clone(),
                value: update.value,
            });
        }

        if state.active && rule.clears(update.value) {
            state.active = false;
            return Some(AlertTransition::Cleared {
                rule: rule.clone(),
                value: update.value,
            });
        }

        None
    }

    /// Drop every latch without reporting a clear. Used when monitoring is
    /// suspended, not when readings improve.
    pub fn reset(&mut self) {
        for (_, state) in self.watched.values_mut() {
            state.active = false;
        }
    }

    #[cfg(test)]
    pub fn state(&self, metric: Metric) -> Option<&AlertState> {
        self.watched.get(&metric).map(|(_, state)| state)
    }

    pub fn active_metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.watched
            .iter()
            .filter(|(_, (_, state))| state.active)
            .map(|(metric, _)| *metric)
    }
}
