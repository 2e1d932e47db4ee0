// Telemetry domain models
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Metric {
    Rpm,
    Speed,
    CoolantTemp,
    IntakeTemp,
    EngineLoad,
    ThrottlePos,
    #[serde(rename = "ELM_VOLTAGE", alias = "SUPPLY_VOLTAGE")]
    SupplyVoltage,
    Maf,
}

struct MetricInfo {
    wire_name: &'static str,
    label: &'static str,
    unit: &'static str,
}

// Indexed by declaration order of `Metric`.
const METRIC_TABLE: [MetricInfo; 8] = [
    MetricInfo { wire_name: "RPM", label: "Engine speed", unit: "rpm" },
    MetricInfo { wire_name: "SPEED", label: "Vehicle speed", unit: "km/h" },
    MetricInfo { wire_name: "COOLANT_TEMP", label: "Coolant temperature", unit: "°C" },
    MetricInfo { wire_name: "INTAKE_TEMP", label: "Intake temperature", unit: "°C" },
    MetricInfo { wire_name: "ENGINE_LOAD", label: "Engine load", unit: "%" },
    MetricInfo { wire_name: "THROTTLE_POS", label: "Throttle position", unit: "%" },
    MetricInfo { wire_name: "ELM_VOLTAGE", label: "Supply voltage", unit: "V" },
    MetricInfo { wire_name: "MAF", label: "Mass air flow", unit: "g/s" },
];

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Rpm,
        Metric::Speed,
        Metric::CoolantTemp,
        Metric::IntakeTemp,
        Metric::EngineLoad,
        Metric::ThrottlePos,
        Metric::SupplyVoltage,
        Metric::Maf,
    ];

    fn info(self) -> &'static MetricInfo {
        &METRIC_TABLE[self as usize]
    }

    /// Key used for this metric on the wire
    pub fn wire_name(self) -> &'static str {
        self.info().wire_name
    }

    pub fn label(self) -> &'static str {
        self.info().label
    }

    pub fn unit(self) -> &'static str {
        self.info().unit
    }

    /// Resolve a wire key to a metric. `SUPPLY_VOLTAGE` is accepted as an alias
    /// of `ELM_VOLTAGE`.
    pub fn from_wire_name(name: &str) -> Option<Metric> {
        if name == "SUPPLY_VOLTAGE" {
            return Some(Metric::SupplyVoltage);
        }
        Metric::ALL.into_iter().find(|m| m.wire_name() == name)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricUpdate {
    pub metric: Metric,
    pub value: f64,
    pub received_at: DateTime<Utc>,
}

impl MetricUpdate {
    pub fn new(metric: Metric, value: f64, received_at: DateTime<Utc>) -> Self {
        Self {
            metric,
            value,
            received_at,
        }
    }
}

/// Latest known value of every metric seen so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySample {
    values: BTreeMap<Metric, f64>,
    received_at: Option<DateTime<Utc>>,
}

impl TelemetrySample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an update. Non-finite values never reach the sample.
    pub fn apply(&mut self, update: &MetricUpdate) -> bool {
        if !update.value.is_finite() {
            return false;
        }
        self.values.insert(update.metric, update.value);
        self.received_at = Some(update.received_at);
        true
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }
}
