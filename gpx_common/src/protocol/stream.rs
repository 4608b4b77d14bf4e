//! Payloads published on streams.

use crate::asset::AssetEvent;
use crate::consts::METRIC_TTL_SECS;
use crate::gpio::{Direction, GpioState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Status metric of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMetric {
    /// Element the metric belongs to (the parent device).
    pub name: String,
    /// `status.GPI<n>` / `status.GPO<n>`.
    pub metric_type: String,
    /// State string.
    pub value: String,
    /// Unit, always empty for states.
    pub unit: String,
    /// Validity in seconds.
    pub ttl: u32,
    /// Measurement time, Unix seconds.
    pub time: u64,
    /// `port` and `sname` (asset name).
    pub aux: BTreeMap<String, String>,
}

impl StatusMetric {
    /// Metric for a channel state.
    pub fn channel_status(
        parent: &str,
        asset_name: &str,
        direction: Direction,
        channel: u32,
        state: GpioState,
    ) -> Self {
        let port = direction.port_name(channel);
        Self {
            name: parent.to_string(),
            metric_type: format!("status.{port}"),
            value: state.as_str().to_string(),
            unit: String::new(),
            ttl: METRIC_TTL_SECS,
            time: unix_now(),
            aux: BTreeMap::from([
                ("port".to_string(), port),
                ("sname".to_string(), asset_name.to_string()),
            ]),
        }
    }

    /// Publication subject, `<type>@<name>`.
    pub fn subject(&self) -> String {
        format!("{}@{}", self.metric_type, self.name)
    }
}

/// Alert lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertState {
    /// State differs from normal.
    Active,
    /// Back to normal.
    Resolved,
}

/// Alarm raised by a sensor leaving its normal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Rule name, `<sensor type>@<asset>`.
    pub rule: String,
    /// Sensor asset.
    pub asset: String,
    /// Lifecycle.
    pub state: AlertState,
    /// Severity from the template.
    pub severity: String,
    /// Alarm message with `$status` substituted.
    pub description: String,
    /// Unix seconds.
    pub time: u64,
}

impl AlertEvent {
    /// Publication subject.
    pub fn subject(&self) -> String {
        format!("alert.{}", self.rule)
    }
}

/// Anything carried on a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamMessage {
    /// Channel status.
    Metric(StatusMetric),
    /// Alarm.
    Alert(AlertEvent),
    /// Inventory change.
    Asset(AssetEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_status_metric() {
        let metric =
            StatusMetric::channel_status("IPC1", "sensorgpio-1", Direction::In, 1, GpioState::Closed);
        assert_eq!(metric.metric_type, "status.GPI1");
        assert_eq!(metric.value, "closed");
        assert_eq!(metric.subject(), "status.GPI1@IPC1");
        assert_eq!(metric.aux.get("port").map(String::as_str), Some("GPI1"));
        assert_eq!(metric.aux.get("sname").map(String::as_str), Some("sensorgpio-1"));
        assert_eq!(metric.ttl, METRIC_TTL_SECS);
    }
}
