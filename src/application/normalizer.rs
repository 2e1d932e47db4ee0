// Telemetry normalizer - Decodes inbound frames into metric updates
use crate::application::transport::TransportFrame;
use crate::domain::telemetry::{Metric, MetricUpdate};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Decode one inbound frame into zero or more metric updates.
///
/// Two payload shapes are accepted:
/// - flat: `{"RPM": 3000, "SPEED": 42}`
/// - command: `{"command": "RPM", "value": 3000}`
///
/// Anything else (plain text acknowledgements, non-object JSON, unknown keys,
/// non-numeric values) produces no updates.
pub fn normalize(frame: &TransportFrame, received_at: DateTime<Utc>) -> Vec<MetricUpdate> {
    let text = match frame {
        TransportFrame::Text(text) => text.as_str(),
        TransportFrame::Binary(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!("Discarding binary frame that is not UTF-8: {}", e);
                return Vec::new();
            }
        },
        TransportFrame::Close => return Vec::new(),
    };

    normalize_text(text, received_at)
}

pub fn normalize_text(text: &str, received_at: DateTime<Utc>) -> Vec<MetricUpdate> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            tracing::debug!("Received plain text message: {}", text);
            return Vec::new();
        }
    };

    let Value::Object(object) = value else {
        tracing::debug!("Ignoring non-object JSON message: {}", text);
        return Vec::new();
    };

    let readings = if object.contains_key("command") {
        command_shape(&object)
    } else {
        flat_shape(&object)
    };

    readings
        .into_iter()
        .map(|(metric, value)| MetricUpdate::new(metric, value, received_at))
        .collect()
}

fn flat_shape(object: &Map<String, Value>) -> Vec<(Metric, f64)> {
    Metric::ALL
        .into_iter()
        .filter_map(|metric| {
            let value = object
                .get(metric.wire_name())
                .or_else(|| alias_value(object, metric))?;
            numeric(value).map(|v| (metric, v))
        })
        .collect()
}

fn alias_value(object: &Map<String, Value>, metric: Metric) -> Option<&Value> {
    match metric {
        Metric::SupplyVoltage => object.get("SUPPLY_VOLTAGE"),
        _ => None,
    }
}

fn command_shape(object: &Map<String, Value>) -> Vec<(Metric, f64)> {
    let Some(metric) = object
        .get("command")
        .and_then(Value::as_str)
        .and_then(Metric::from_wire_name)
    else {
        return Vec::new();
    };

    object
        .get("value")
        .and_then(numeric)
        .map(|v| vec![(metric, v)])
        .unwrap_or_default()
}

fn numeric(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}
