// Configuration - Layered file and environment settings for every mode
use crate::application::obd_source::FrameShape;
use crate::application::pipeline::PipelineSettings;
use crate::application::supervisor::{ReconnectPolicy, SupervisorSettings};
use crate::domain::alert::{AlertDirection, AlertRule};
use crate::domain::telemetry::Metric;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/obd-relay";
const ENV_PREFIX: &str = "OBD_RELAY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub source: SourceSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelaySettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorSettings {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_delay_ms")]
    pub connect_delay_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "default_alerts")]
    pub alerts: Vec<AlertRuleConfig>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            topic: default_topic(),
            connect_delay_ms: default_delay_ms(),
            reconnect: ReconnectConfig::default(),
            alerts: default_alerts(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertRuleConfig {
    pub metric: Metric,
    pub threshold: f64,
    #[serde(default)]
    pub direction: AlertDirection,
    #[serde(default = "default_true")]
    pub audible: bool,
    #[serde(default = "default_true")]
    pub notify: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceSettings {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Publishing period; zero is treated as one millisecond
    #[serde(default = "default_delay_ms")]
    pub interval_ms: u64,
    /// Wait before the first connect; the source dials immediately by default
    #[serde(default)]
    pub connect_delay_ms: u64,
    #[serde(default)]
    pub shape: FrameShape,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            topic: default_topic(),
            interval_ms: default_delay_ms(),
            connect_delay_ms: 0,
            shape: FrameShape::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_url() -> String {
    "ws://127.0.0.1:8000".to_string()
}

fn default_topic() -> String {
    "all".to_string()
}

fn default_delay_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_alerts() -> Vec<AlertRuleConfig> {
    vec![AlertRuleConfig {
        metric: Metric::CoolantTemp,
        threshold: 90.0,
        direction: AlertDirection::Above,
        audible: true,
        notify: true,
    }]
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

impl AlertRuleConfig {
    pub fn rule(&self) -> AlertRule {
        AlertRule {
            metric: self.metric,
            threshold: self.threshold,
            direction: self.direction,
            audible: self.audible,
            notify: self.notify,
        }
    }
}

impl MonitorSettings {
    pub fn pipeline(&self) -> PipelineSettings {
        PipelineSettings {
            supervisor: SupervisorSettings {
                connect_delay: Duration::from_millis(self.connect_delay_ms),
                topic: self.topic.clone(),
                reconnect: self.reconnect.policy(),
            },
            rules: self.alerts.iter().map(AlertRuleConfig::rule).collect(),
        }
    }
}

impl SourceSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn supervisor(&self) -> SupervisorSettings {
        SupervisorSettings {
            connect_delay: Duration::from_millis(self.connect_delay_ms),
            topic: self.topic.clone(),
            reconnect: self.reconnect.policy(),
        }
    }
}

/// Load settings from `path` (any format the `config` crate understands; the
/// file is optional) overlaid with `OBD_RELAY__SECTION__KEY` environment
/// variables.
pub fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = load_config("config/does-not-exist").unwrap();
        assert_eq!(config.relay.bind, "0.0.0.0:8000");
        assert_eq!(config.monitor.topic, "all");

        let pipeline = config.monitor.pipeline();
        assert_eq!(pipeline.supervisor.connect_delay, Duration::from_secs(1));
        assert_eq!(pipeline.supervisor.reconnect, ReconnectPolicy::default());
        assert_eq!(pipeline.rules, vec![AlertRule::coolant_default()]);
    }

    #[test]
    fn test_alert_rules_from_toml() {
        let toml = r#"
            [monitor]
            url = "ws://relay.local:9000"

            [monitor.reconnect]
            delay_ms = 500
            backoff_factor = 2.0
            max_attempts = 5

            [[monitor.alerts]]
            metric = "COOLANT_TEMP"
            threshold = 95.0

            [[monitor.alerts]]
            metric = "SUPPLY_VOLTAGE"
            threshold = 11.8
            direction = "below"
            audible = false
        "#;
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.monitor.url, "ws://relay.local:9000");
        let pipeline = config.monitor.pipeline();
        assert_eq!(pipeline.supervisor.reconnect.delay, Duration::from_millis(500));
        assert_eq!(pipeline.supervisor.reconnect.max_attempts, Some(5));
        assert_eq!(pipeline.rules.len(), 2);
        assert_eq!(pipeline.rules[1].metric, Metric::SupplyVoltage);
        assert_eq!(pipeline.rules[1].direction, AlertDirection::Below);
        assert!(!pipeline.rules[1].audible);
        assert!(pipeline.rules[1].notify);
    }

    #[test]
    fn test_source_shape() {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[source]\nshape = \"command\"\ninterval_ms = 250",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.source.shape, FrameShape::Command);
        assert_eq!(config.source.interval_ms, 250);
        assert_eq!(config.source.interval(), Duration::from_millis(250));
        assert_eq!(config.source.supervisor().connect_delay, Duration::ZERO);
    }

    #[test]
    fn test_source_zero_interval_and_connect_delay() {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[source]\ninterval_ms = 0\nconnect_delay_ms = 1500",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.source.interval_ms, 0);
        assert_eq!(config.source.interval(), Duration::from_millis(1));
        assert_eq!(
            config.source.supervisor().connect_delay,
            Duration::from_millis(1500)
        );
    }
}
