//! Sensor registry.
//!
//! The ordered set of monitored channels, shared by the asset tracker
//! (writer) and the protocol server (reader, state updates). All access is
//! through methods that lock, copy and release; no reference into the
//! collection ever leaves this module.

use gpx_common::asset::AssetEvent;
use gpx_common::gpio::{Direction, GpioState, HardwareConfig};
use gpx_common::template::{SensorTemplate, parse_power_source};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The event cannot become an addressable record.
    #[error("record {asset} rejected: {reason}")]
    RecordRejected {
        /// Asset name.
        asset: String,
        /// Why.
        reason: String,
    },
}

/// What `upsert` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New record appended.
    Created,
    /// Existing record merged in place.
    Updated,
    /// Record dropped (delete or inactive).
    Removed,
    /// Removal of an unknown asset.
    Ignored,
}

/// One monitored channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRecord {
    /// Unique key.
    pub asset_name: String,
    /// Human readable name.
    pub display_name: String,
    /// Template key.
    pub part_number: String,
    /// Device the channel belongs to.
    pub parent: String,
    /// Physical location.
    pub location: String,
    /// Manufacturer.
    pub manufacturer: String,
    /// Sensor type tag.
    pub sensor_type: String,
    /// Input or output.
    pub direction: Direction,
    /// Expected state.
    pub normal_state: GpioState,
    /// Last observed or commanded state.
    pub current_state: GpioState,
    /// Alarm message template.
    pub alarm_message: String,
    /// Alarm severity.
    pub alarm_severity: String,
    /// Output to energize before reading.
    pub power_source: Option<u32>,
    /// Logical channel.
    pub channel: u32,
    /// Physical pin under the configuration current at snapshot time.
    pub pin: Option<u32>,
    /// An alert is raised for the current state.
    pub alert_triggered: bool,
    explicit: ExplicitFields,
}

/// Template-backed fields an asset event has set; templates leave them alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ExplicitFields {
    part_number: bool,
    normal_state: bool,
    power_source: bool,
    alarm_message: bool,
    alarm_severity: bool,
}

impl SensorRecord {
    fn blank(asset_name: &str, direction: Direction, channel: u32) -> Self {
        Self {
            asset_name: asset_name.to_string(),
            display_name: String::new(),
            part_number: String::new(),
            parent: String::new(),
            location: String::new(),
            manufacturer: String::new(),
            sensor_type: String::new(),
            direction,
            normal_state: GpioState::Unknown,
            current_state: GpioState::Unknown,
            alarm_message: String::new(),
            alarm_severity: String::new(),
            power_source: None,
            channel,
            pin: None,
            alert_triggered: false,
            explicit: ExplicitFields::default(),
        }
    }

    /// Port name, e.g. `GPI1`.
    pub fn port_name(&self) -> String {
        self.direction.port_name(self.channel)
    }

    /// Matches an asset name or display name.
    pub fn is_named(&self, id: &str) -> bool {
        self.asset_name == id || (!self.display_name.is_empty() && self.display_name == id)
    }

    /// Element name metrics are attached to: the parent, else the asset.
    pub fn metric_owner(&self) -> &str {
        if self.parent.is_empty() {
            &self.asset_name
        } else {
            &self.parent
        }
    }

    /// Template first, then every explicit event field on top. Fields an
    /// earlier event set explicitly keep their value over the template.
    fn merge(&mut self, event: &AssetEvent, template: Option<&SensorTemplate>) {
        let explicit = &mut self.explicit;
        explicit.part_number |= event.part_number.is_some();
        explicit.normal_state |= event.normal_state.is_some();
        explicit.power_source |= event.power_source.is_some();
        explicit.alarm_message |= event.alarm_message.is_some();
        explicit.alarm_severity |= event.alarm_severity.is_some();
        let explicit = *explicit;

        if let Some(t) = template {
            self.manufacturer = t.manufacturer.clone();
            self.sensor_type = t.sensor_type.clone();
            if !explicit.part_number {
                self.part_number = t.part_number.clone();
            }
            if !explicit.normal_state {
                self.normal_state = t.normal_state();
            }
            if !explicit.alarm_message {
                self.alarm_message = t.alarm_message.clone();
            }
            if !explicit.alarm_severity {
                self.alarm_severity = t.alarm_severity.clone();
            }
            if !explicit.power_source {
                self.power_source = t.power_source_channel();
            }
        }

        if let Some(v) = &event.display_name {
            self.display_name = v.clone();
        }
        if let Some(v) = &event.part_number {
            self.part_number = v.clone();
        }
        if let Some(v) = &event.parent {
            self.parent = v.clone();
        }
        if let Some(v) = &event.location {
            self.location = v.clone();
        }
        if let Some(v) = event.normal_state {
            self.normal_state = v;
        }
        if let Some(v) = &event.power_source {
            self.power_source = parse_power_source(v);
        }
        if let Some(v) = &event.alarm_message {
            self.alarm_message = v.clone();
        }
        if let Some(v) = &event.alarm_severity {
            self.alarm_severity = v.clone();
        }

        if !self.normal_state.is_known() {
            self.normal_state = match self.direction {
                Direction::In => GpioState::Open,
                Direction::Out => GpioState::Closed,
            };
        }
    }
}

/// Ordered, internally synchronized collection of [`SensorRecord`]s.
pub struct SensorRegistry {
    records: Mutex<Vec<SensorRecord>>,
    hardware: Arc<RwLock<HardwareConfig>>,
}

impl SensorRegistry {
    /// Empty registry validated against `hardware`.
    pub fn new(hardware: Arc<RwLock<HardwareConfig>>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            hardware,
        }
    }

    /// Apply an asset event.
    ///
    /// Create and update share one path: the template and the explicit
    /// event fields are merged onto the existing record, or onto a blank one
    /// for a new asset. Fields the event omits keep their value, as do
    /// `current_state` and `alert_triggered`. Delete and inactive status
    /// remove the record.
    ///
    /// # Errors
    ///
    /// `RecordRejected` when no direction or channel can be determined, or
    /// when the channel is not addressable under the current hardware
    /// configuration. Nothing is inserted in that case.
    pub fn upsert(
        &self,
        event: &AssetEvent,
        template: Option<&SensorTemplate>,
    ) -> Result<UpsertOutcome, RegistryError> {
        if event.is_removal() {
            return Ok(match self.remove(&event.name) {
                Some(_) => UpsertOutcome::Removed,
                None => UpsertOutcome::Ignored,
            });
        }

        let reject = |reason: String| RegistryError::RecordRejected {
            asset: event.name.clone(),
            reason,
        };
        let existing = self.get(&event.name);

        let direction = event
            .implied_direction()
            .or_else(|| template.and_then(SensorTemplate::direction))
            .or(existing.as_ref().map(|r| r.direction))
            .ok_or_else(|| reject("direction unknown (missing template?)".to_string()))?;
        let channel = event
            .channel
            .or(existing.as_ref().map(|r| r.channel))
            .ok_or_else(|| reject("missing channel".to_string()))?;

        self.hardware
            .read()
            .check_channel(channel, direction)
            .map_err(|e| reject(e.to_string()))?;

        let mut record = match existing {
            Some(mut current) => {
                current.direction = direction;
                current.channel = channel;
                current.pin = None;
                current
            }
            None => SensorRecord::blank(&event.name, direction, channel),
        };
        record.merge(event, template);

        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.asset_name == event.name) {
            Some(current) => {
                record.current_state = current.current_state;
                record.alert_triggered = current.alert_triggered;
                *current = record;
                debug!("Sensor {} updated", event.name);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                info!(
                    "Sensor {} registered on {}",
                    event.name,
                    direction.port_name(channel)
                );
                records.push(record);
                Ok(UpsertOutcome::Created)
            }
        }
    }

    /// Remove a record; no-op for unknown names.
    pub fn remove(&self, asset_name: &str) -> Option<SensorRecord> {
        let mut records = self.records.lock();
        let index = records.iter().position(|r| r.asset_name == asset_name)?;
        info!("Sensor {} removed", asset_name);
        Some(records.remove(index))
    }

    /// Copy of every record, in first-seen order, with pins resolved
    /// against the current hardware configuration.
    pub fn snapshot(&self) -> Vec<SensorRecord> {
        let hardware = self.hardware.read().clone();
        let mut records = self.records.lock().clone();
        for record in &mut records {
            record.pin = hardware.resolve_pin(record.channel, record.direction).ok();
        }
        records
    }

    /// Copy of the record with this exact asset name.
    pub fn get(&self, asset_name: &str) -> Option<SensorRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.asset_name == asset_name)
            .cloned()
    }

    /// Copy of the record matching an asset or display name.
    pub fn find(&self, id: &str) -> Option<SensorRecord> {
        let records = self.records.lock();
        records
            .iter()
            .find(|r| r.asset_name == id)
            .or_else(|| records.iter().find(|r| r.is_named(id)))
            .cloned()
    }

    /// Store a new current state; false for unknown names.
    pub fn set_current_state(&self, asset_name: &str, state: GpioState) -> bool {
        self.update(asset_name, |r| r.current_state = state)
    }

    /// Store the alert flag; false for unknown names.
    pub fn set_alert_triggered(&self, asset_name: &str, triggered: bool) -> bool {
        self.update(asset_name, |r| r.alert_triggered = triggered)
    }

    fn update(&self, asset_name: &str, f: impl FnOnce(&mut SensorRecord)) -> bool {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.asset_name == asset_name) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
