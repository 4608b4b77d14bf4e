//! Sensor template descriptors.
//!
//! A template describes a sensor model by part number. It is stored as one
//! TOML file per part number and fills in every field of a sensor record
//! the asset event leaves out.
//!
//! ```toml
//! manufacturer = "Eaton"
//! part-number = "DCS001"
//! type = "door-contact-sensor"
//! normal-state = "closed"
//! gpx-direction = "GPI"
//! power-source = "internal"
//! alarm-severity = "WARNING"
//! alarm-message = "Door has been $status"
//! ```

use crate::gpio::{Direction, GpioState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default manufacturer of a template added without one.
pub const DEFAULT_MANUFACTURER: &str = "unknown";
/// Default normal state.
pub const DEFAULT_NORMAL_STATE: &str = "opened";
/// Default direction.
pub const DEFAULT_DIRECTION: &str = "GPI";
/// Default power source.
pub const DEFAULT_POWER_SOURCE: &str = "internal";
/// Default alarm severity.
pub const DEFAULT_SEVERITY: &str = "WARNING";

/// Template validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A required field is absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// On-disk template descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorTemplate {
    /// Manufacturer name.
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    /// Part number, also the file stem.
    #[serde(rename = "part-number", default)]
    pub part_number: String,
    /// Sensor type tag.
    #[serde(rename = "type")]
    pub sensor_type: String,
    /// Normal state (`opened`/`closed`).
    #[serde(rename = "normal-state", default = "default_normal_state")]
    pub normal_state: String,
    /// `GPI` or `GPO`.
    #[serde(rename = "gpx-direction", default = "default_direction")]
    pub direction: String,
    /// `internal`, or the GPO channel powering the sensor.
    #[serde(rename = "power-source", default = "default_power_source")]
    pub power_source: String,
    /// Alarm severity.
    #[serde(rename = "alarm-severity", default = "default_severity")]
    pub alarm_severity: String,
    /// Alarm message; `$status` is replaced by the state string.
    #[serde(rename = "alarm-message")]
    pub alarm_message: String,
}

impl SensorTemplate {
    /// Parsed normal state; unparseable values are `Unknown`.
    pub fn normal_state(&self) -> GpioState {
        self.normal_state.parse().unwrap_or(GpioState::Unknown)
    }

    /// Parsed direction.
    pub fn direction(&self) -> Option<Direction> {
        self.direction.parse().ok()
    }

    /// Output channel powering the sensor, if any.
    pub fn power_source_channel(&self) -> Option<u32> {
        parse_power_source(&self.power_source)
    }

    /// Fields of a full manifest entry, in wire order.
    pub fn manifest_fields(&self) -> [String; 8] {
        [
            self.part_number.clone(),
            self.manufacturer.clone(),
            self.sensor_type.clone(),
            self.normal_state.clone(),
            self.direction.clone(),
            self.power_source.clone(),
            self.alarm_severity.clone(),
            self.alarm_message.clone(),
        ]
    }

    /// Fields of a summary manifest entry, in wire order.
    pub fn summary_fields(&self) -> [String; 2] {
        [self.part_number.clone(), self.manufacturer.clone()]
    }
}

/// Interpret a power-source field: a channel number names the output to
/// energize, anything else (`internal`, empty) is self-powered.
pub fn parse_power_source(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("GPO")
        .or_else(|| trimmed.strip_prefix("gpo"))
        .unwrap_or(trimmed);
    digits.parse().ok().filter(|channel| *channel > 0)
}

/// Template as received from a peer: every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateDescriptor {
    /// Part number (required).
    pub part_number: Option<String>,
    /// Manufacturer.
    pub manufacturer: Option<String>,
    /// Sensor type (required).
    pub sensor_type: Option<String>,
    /// Normal state.
    pub normal_state: Option<String>,
    /// Direction.
    pub direction: Option<String>,
    /// Power source.
    pub power_source: Option<String>,
    /// Alarm severity.
    pub alarm_severity: Option<String>,
    /// Alarm message (required).
    pub alarm_message: Option<String>,
}

impl TemplateDescriptor {
    /// Validate required fields and default the rest.
    ///
    /// # Errors
    ///
    /// `MissingField` naming the first absent required field.
    pub fn into_template(self) -> Result<SensorTemplate, TemplateError> {
        let part_number = self.part_number.ok_or(TemplateError::MissingField("part-number"))?;
        let sensor_type = self.sensor_type.ok_or(TemplateError::MissingField("type"))?;
        let alarm_message = self
            .alarm_message
            .ok_or(TemplateError::MissingField("alarm-message"))?;

        Ok(SensorTemplate {
            manufacturer: self.manufacturer.unwrap_or_else(default_manufacturer),
            part_number,
            sensor_type,
            normal_state: self.normal_state.unwrap_or_else(default_normal_state),
            direction: self.direction.unwrap_or_else(default_direction),
            power_source: self.power_source.unwrap_or_else(default_power_source),
            alarm_severity: self.alarm_severity.unwrap_or_else(default_severity),
            alarm_message,
        })
    }
}

fn default_manufacturer() -> String {
    DEFAULT_MANUFACTURER.to_string()
}

fn default_normal_state() -> String {
    DEFAULT_NORMAL_STATE.to_string()
}

fn default_direction() -> String {
    DEFAULT_DIRECTION.to_string()
}

fn default_power_source() -> String {
    DEFAULT_POWER_SOURCE.to_string()
}

fn default_severity() -> String {
    DEFAULT_SEVERITY.to_string()
}
