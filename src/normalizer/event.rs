//! Fan-out of one alert into one flattened event per threat key.

use super::fields::{
    self, DEST_IP_RAW, DEST_URL_RAW, EVENT_TS, EVENT_TS_FORMAT, KIND_HTTP, KIND_IP, PIPELINE,
    SOURCE_DEST_IP, SOURCE_TS, SOURCE_URL, THREAT_SEVERITY, THREAT_TITLE, THREAT_VALUE,
    WISDOM_DOMAIN, WISDOM_FLAGS, WISDOM_LABELS,
};
use crate::model::{Alert, AlertBatch, NormalizedEvent, Wisdom};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Events produced from one batch plus the counts worth surfacing in telemetry.
#[derive(Debug, Default)]
pub struct NormalizeSummary {
    pub events: Vec<NormalizedEvent>,
    /// Alerts that carried no threat keys and therefore produced no events.
    pub alerts_without_threats: usize,
}

/// Normalizes `batch` using the current wall-clock time as the fallback timestamp.
pub fn normalize(batch: &AlertBatch) -> Vec<NormalizedEvent> {
    normalize_at(batch, Utc::now())
}

pub fn normalize_at(batch: &AlertBatch, now: DateTime<Utc>) -> Vec<NormalizedEvent> {
    normalize_batch(batch, now).events
}

pub fn normalize_batch(batch: &AlertBatch, now: DateTime<Utc>) -> NormalizeSummary {
    let mut summary = NormalizeSummary::default();

    for alert in &batch.alerts {
        if alert.threat_keys.is_empty() {
            summary.alerts_without_threats += 1;
            tracing::debug!(kind = %alert.kind, "alert has no threats; no events emitted");
            continue;
        }

        let timestamp = alert_timestamp(alert, now);
        let shared = shared_fields(alert, timestamp);

        for threat_key in &alert.threat_keys {
            let mut fields = shared.clone();
            fields.insert(THREAT_VALUE.into(), Value::String(threat_key.clone()));

            if let Some(info) = batch.threat_catalog.get(threat_key) {
                fields.insert(THREAT_SEVERITY.into(), Value::from(info.severity));
                fields.insert(THREAT_TITLE.into(), Value::String(info.title.clone()));
            } else {
                tracing::debug!(threat = %threat_key, "threat missing from batch catalog");
            }

            summary.events.push(NormalizedEvent { timestamp, fields });
        }
    }

    summary
}

fn alert_timestamp(alert: &Alert, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = alert.fields.get(SOURCE_TS) else {
        return now;
    };

    match raw.as_str().map(DateTime::parse_from_rfc3339) {
        Some(Ok(parsed)) => parsed.with_timezone(&Utc),
        Some(Err(err)) => {
            tracing::debug!(ts = %raw, error = %err, "unparseable alert timestamp; using now");
            now
        }
        None => {
            tracing::debug!(ts = %raw, "non-string alert timestamp; using now");
            now
        }
    }
}

fn shared_fields(alert: &Alert, timestamp: DateTime<Utc>) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert(
        EVENT_TS.into(),
        Value::String(timestamp.format(EVENT_TS_FORMAT).to_string()),
    );
    out.insert(PIPELINE.into(), Value::String(alert.kind.clone()));

    for (key, value) in &alert.fields {
        if is_absent(value) {
            continue;
        }
        let Some(path) = fields::normalized_path(key) else {
            continue;
        };
        out.insert(path.into(), value.clone());

        if key == SOURCE_DEST_IP && alert.kind == KIND_IP {
            out.insert(DEST_IP_RAW.into(), value.clone());
        }
        if key == SOURCE_URL && alert.kind == KIND_HTTP {
            out.insert(DEST_URL_RAW.into(), value.clone());
        }
    }

    if let Some(wisdom) = &alert.wisdom {
        insert_wisdom(&mut out, wisdom);
    }

    out
}

// Absent sub-fields still get a key so every wisdom-bearing event has the same shape.
fn insert_wisdom(out: &mut Map<String, Value>, wisdom: &Wisdom) {
    let domain = wisdom
        .domain
        .as_ref()
        .filter(|domain| !domain.is_empty())
        .map(|domain| Value::String(domain.clone()))
        .unwrap_or(Value::Null);
    out.insert(WISDOM_DOMAIN.into(), domain);
    out.insert(WISDOM_FLAGS.into(), string_list(wisdom.flags.as_deref()));
    out.insert(WISDOM_LABELS.into(), string_list(wisdom.labels.as_deref()));
}

fn string_list(values: Option<&[String]>) -> Value {
    Value::Array(
        values
            .unwrap_or_default()
            .iter()
            .cloned()
            .map(Value::String)
            .collect(),
    )
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}
