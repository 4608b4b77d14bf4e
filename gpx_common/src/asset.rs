//! Asset-inventory events.
//!
//! The inventory announces every GPIO sensor and output it knows about.
//! Direct fields override whatever the part-number template provides.

use crate::consts::{SUBTYPE_GPO, SUBTYPE_SENSOR_GPIO};
use crate::gpio::{Direction, GpioState};
use serde::{Deserialize, Serialize};

/// What happened to the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetOperation {
    /// First announcement.
    Create,
    /// Field change.
    Update,
    /// Removed from inventory.
    Delete,
}

/// Lifecycle status of the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    /// Monitored.
    #[default]
    Active,
    /// Kept in inventory but not monitored.
    #[serde(rename = "nonactive")]
    Inactive,
}

/// One asset-inventory event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEvent {
    /// Operation.
    pub operation: AssetOperation,
    /// Status.
    #[serde(default)]
    pub status: AssetStatus,
    /// Unique asset name.
    pub name: String,
    /// Asset subtype (`sensorgpio`, `gpo`).
    #[serde(default)]
    pub subtype: String,
    /// Human readable name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Part number (template key).
    #[serde(default)]
    pub part_number: Option<String>,
    /// Logical channel.
    #[serde(default)]
    pub channel: Option<u32>,
    /// Explicit direction.
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Device the channel belongs to.
    #[serde(default)]
    pub parent: Option<String>,
    /// Physical location.
    #[serde(default)]
    pub location: Option<String>,
    /// Normal-state override.
    #[serde(default)]
    pub normal_state: Option<GpioState>,
    /// Power-source override.
    #[serde(default)]
    pub power_source: Option<String>,
    /// Alarm-message override.
    #[serde(default)]
    pub alarm_message: Option<String>,
    /// Alarm-severity override.
    #[serde(default)]
    pub alarm_severity: Option<String>,
}

impl AssetEvent {
    /// Event with only the identity filled in.
    pub fn new(operation: AssetOperation, name: impl Into<String>) -> Self {
        Self {
            operation,
            status: AssetStatus::Active,
            name: name.into(),
            subtype: String::new(),
            display_name: None,
            part_number: None,
            channel: None,
            direction: None,
            parent: None,
            location: None,
            normal_state: None,
            power_source: None,
            alarm_message: None,
            alarm_severity: None,
        }
    }

    /// Whether the event concerns a GPIO asset at all.
    pub fn is_gpio(&self) -> bool {
        self.subtype == SUBTYPE_SENSOR_GPIO || self.subtype == SUBTYPE_GPO
    }

    /// Whether the asset must be dropped from monitoring.
    pub fn is_removal(&self) -> bool {
        self.operation == AssetOperation::Delete || self.status == AssetStatus::Inactive
    }

    /// Direction implied by the event: explicit, else `Out` for the
    /// output subtype.
    pub fn implied_direction(&self) -> Option<Direction> {
        self.direction
            .or_else(|| (self.subtype == SUBTYPE_GPO).then_some(Direction::Out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal() {
        let mut event = AssetEvent::new(AssetOperation::Update, "sensorgpio-1");
        assert!(!event.is_removal());
        event.status = AssetStatus::Inactive;
        assert!(event.is_removal());
        assert!(AssetEvent::new(AssetOperation::Delete, "x").is_removal());
    }

    #[test]
    fn test_gpo_subtype_implies_output() {
        let mut event = AssetEvent::new(AssetOperation::Create, "gpo-12");
        event.subtype = SUBTYPE_GPO.to_string();
        assert!(event.is_gpio());
        assert_eq!(event.implied_direction(), Some(Direction::Out));
        event.subtype = SUBTYPE_SENSOR_GPIO.to_string();
        assert_eq!(event.implied_direction(), None);
    }

    #[test]
    fn test_status_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            status: AssetStatus,
        }
        let parsed: Wrapper = toml::from_str("status = \"nonactive\"").unwrap();
        assert_eq!(parsed.status, AssetStatus::Inactive);
    }
}
