//! Wire format of the alert endpoint and its conversion into [`AlertBatch`].
//!
//! The envelope is decoded strictly since the next cursor depends on it. Alert
//! elements are decoded one at a time so a single malformed payload only costs
//! that alert.

use crate::model::{Alert, AlertBatch, Cursor, ThreatInfo};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub(crate) struct AlertResponse {
    follow: String,
    #[serde(default)]
    more: bool,
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    before: Option<String>,
    #[serde(default)]
    alerts: Option<Vec<Value>>,
    #[serde(default)]
    threats: Option<HashMap<String, Value>>,
}

/// Decodes a 200 response body into a batch.
pub(crate) fn decode_batch(body: &[u8]) -> Result<AlertBatch, serde_json::Error> {
    let response: AlertResponse = serde_json::from_slice(body)?;
    Ok(response.into_batch())
}

impl AlertResponse {
    fn into_batch(self) -> AlertBatch {
        let raw_alerts = self.alerts.unwrap_or_default();
        let mut alerts = Vec::with_capacity(raw_alerts.len());
        let mut skipped = 0;

        for (index, raw) in raw_alerts.into_iter().enumerate() {
            match serde_json::from_value::<Alert>(raw) {
                Ok(alert) => alerts.push(alert),
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(
                        index,
                        follow = %self.follow,
                        error = %err,
                        "skipping malformed alert payload"
                    );
                }
            }
        }

        let raw_threats = self.threats.unwrap_or_default();
        let mut threat_catalog = HashMap::with_capacity(raw_threats.len());
        for (key, raw) in raw_threats {
            match serde_json::from_value::<ThreatInfo>(raw) {
                Ok(info) => {
                    threat_catalog.insert(key, info);
                }
                Err(err) => {
                    tracing::warn!(
                        threat = %key,
                        follow = %self.follow,
                        error = %err,
                        "ignoring malformed threat catalog entry"
                    );
                }
            }
        }

        tracing::trace!(
            follow = %self.follow,
            more = self.more,
            after = ?self.after,
            before = ?self.before,
            alerts = alerts.len(),
            skipped,
            "decoded alert batch"
        );

        AlertBatch {
            cursor: Cursor::from(self.follow),
            has_more: self.more,
            alerts,
            threat_catalog,
            skipped,
        }
    }
}
