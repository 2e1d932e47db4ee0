// Presentation ports - Where normalized telemetry and alerts are delivered
use crate::domain::alert::AlertRule;
use crate::domain::command::OutboundCommand;
use crate::domain::telemetry::{MetricUpdate, TelemetrySample};

/// Consumer of the pipeline's output. Implementations render; they hold no
/// pipeline state.
pub trait TelemetrySink: Send + Sync {
    fn on_connection(&self, connected: bool);

    /// Called after `update` has been applied to `sample`
    fn on_update(&self, update: &MetricUpdate, sample: &TelemetrySample);

    /// Visual alert flag for the rule's metric changed
    fn on_alert_flag(&self, rule: &AlertRule, active: bool, value: f64);

    /// Local confirmation of a dispatched command. Nothing upstream has
    /// acknowledged it.
    fn on_command(&self, command: OutboundCommand);
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertNotification {
    pub title: String,
    pub message: String,
}

impl AlertNotification {
    pub fn for_rule(rule: &AlertRule, value: f64) -> Self {
        Self {
            title: rule.title(),
            message: format!("{} is {}{}", rule.metric.label(), value, rule.metric.unit()),
        }
    }
}

/// Side effects raised once when an alert latches.
pub trait AlertNotifier: Send + Sync {
    fn sound_alarm(&self);

    /// Show a notification that stays until the user dismisses it
    fn notify(&self, notification: &AlertNotification);
}

#[cfg(test)]
pub(crate) mod recording {
    //! Sinks that record every call, for asserting on pipeline output.
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SinkCall {
        Connection(bool),
        Update(MetricUpdate),
        AlertFlag(bool, f64),
        Command(OutboundCommand),
        Alarm,
        Notify(AlertNotification),
    }

    #[derive(Default)]
    pub struct RecordingSink {
        calls: Mutex<Vec<SinkCall>>,
    }

    impl RecordingSink {
        pub fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: SinkCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl TelemetrySink for RecordingSink {
        fn on_connection(&self, connected: bool) {
            self.push(SinkCall::Connection(connected));
        }

        fn on_update(&self, update: &MetricUpdate, _sample: &TelemetrySample) {
            self.push(SinkCall::Update(*update));
        }

        fn on_alert_flag(&self, _rule: &AlertRule, active: bool, value: f64) {
            self.push(SinkCall::AlertFlag(active, value));
        }

        fn on_command(&self, command: OutboundCommand) {
            self.push(SinkCall::Command(command));
        }
    }

    impl AlertNotifier for RecordingSink {
        fn sound_alarm(&self) {
            self.push(SinkCall::Alarm);
        }

        fn notify(&self, notification: &AlertNotification) {
            self.push(SinkCall::Notify(notification.clone()));
        }
    }
}
