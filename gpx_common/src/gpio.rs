//! GPIO channel types and pin addressing.
//!
//! A channel is the product-facing number printed next to the connector
//! (`GPI1`, `GPO2`). The kernel addresses a physical pin instead. The
//! translation between the two is owned by [`HardwareConfig`], which is
//! filled by the capability handshake or by explicit overrides.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ─── Error Types ────────────────────────────────────────────────────

/// Hardware addressing and device access errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpioError {
    /// Addressing is not configured, disabled, or the channel is out of range.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The device file could not be read or written.
    #[error("Device I/O error on pin {pin}: {reason}")]
    IoError {
        /// Physical pin.
        pin: u32,
        /// Last error seen.
        reason: String,
    },
}

// ─── Direction ──────────────────────────────────────────────────────

/// Channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// General-purpose input.
    #[serde(rename = "GPI")]
    In,
    /// General-purpose output.
    #[serde(rename = "GPO")]
    Out,
}

impl Direction {
    /// Port prefix (`GPI`/`GPO`).
    pub fn port_prefix(self) -> &'static str {
        match self {
            Self::In => "GPI",
            Self::Out => "GPO",
        }
    }

    /// Lowercase tag used by the capability handshake.
    pub fn wire_type(self) -> &'static str {
        match self {
            Self::In => "gpi",
            Self::Out => "gpo",
        }
    }

    /// Port name of a channel, e.g. `GPI1`.
    pub fn port_name(self, channel: u32) -> String {
        format!("{}{}", self.port_prefix(), channel)
    }

    /// Value written to the sysfs `direction` attribute.
    pub fn sysfs_direction(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.port_prefix())
    }
}

impl FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpi" | "in" | "input" => Ok(Self::In),
            "gpo" | "out" | "output" => Ok(Self::Out),
            _ => Err(format!("unknown direction: {s:?}")),
        }
    }
}

// ─── GpioState ──────────────────────────────────────────────────────

/// Tri-state value of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioState {
    /// Contact open / output energized (`1`).
    #[serde(rename = "opened")]
    Open,
    /// Contact closed / output released (`0`).
    Closed,
    /// Not readable.
    #[default]
    Unknown,
}

impl GpioState {
    /// Status string used in metrics and manifests.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "opened",
            Self::Closed => "closed",
            Self::Unknown => "unknown",
        }
    }

    /// Integer code used by the state file.
    pub fn code(self) -> i32 {
        match self {
            Self::Open => 1,
            Self::Closed => 0,
            Self::Unknown => -1,
        }
    }

    /// Inverse of [`GpioState::code`]; anything else is `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Open,
            0 => Self::Closed,
            _ => Self::Unknown,
        }
    }

    /// Decode the first character of a sysfs `value` file.
    pub fn from_value_byte(byte: u8) -> Self {
        match byte {
            b'1' => Self::Open,
            b'0' => Self::Closed,
            _ => Self::Unknown,
        }
    }

    /// Whether the value is known.
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl fmt::Display for GpioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GpioState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opened" | "open" | "high" | "1" => Ok(Self::Open),
            "closed" | "close" | "low" | "0" => Ok(Self::Closed),
            _ => Err(format!("unknown state: {s:?}")),
        }
    }
}

// ─── HardwareConfig ─────────────────────────────────────────────────

/// Addressing of one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectionConfig {
    /// Number of channels; `0` disables the direction.
    pub count: u32,
    /// Signed offset added to the base address.
    pub offset: i32,
    /// Channels whose pin is not `base + offset + channel`.
    pub mapping: BTreeMap<u32, u32>,
}

/// Channel-to-pin addressing for both directions.
///
/// A direction that was never configured is `None`; every read, write and
/// record creation against it is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareConfig {
    base_address: Option<i32>,
    inputs: Option<DirectionConfig>,
    outputs: Option<DirectionConfig>,
    version: u64,
}

impl HardwareConfig {
    /// Unconfigured addressing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Base address, if set.
    pub fn base_address(&self) -> Option<i32> {
        self.base_address
    }

    /// Configuration of one direction.
    pub fn direction(&self, direction: Direction) -> Option<&DirectionConfig> {
        match direction {
            Direction::In => self.inputs.as_ref(),
            Direction::Out => self.outputs.as_ref(),
        }
    }

    /// Incremented on every change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Both directions configured.
    pub fn is_ready(&self) -> bool {
        self.inputs.is_some() && self.outputs.is_some()
    }

    /// Install the result of a successful handshake for one direction.
    pub fn apply(&mut self, direction: Direction, base_address: Option<i32>, config: DirectionConfig) {
        if let Some(base) = base_address {
            self.base_address = Some(base);
        }
        *self.slot(direction) = Some(config);
        self.version += 1;
    }

    /// Override the base address.
    pub fn set_base_address(&mut self, base: i32) {
        self.base_address = Some(base);
        self.version += 1;
    }

    /// Override the offset of one direction.
    pub fn set_offset(&mut self, direction: Direction, offset: i32) {
        self.slot(direction).get_or_insert_with(DirectionConfig::default).offset = offset;
        self.version += 1;
    }

    /// Override the channel count of one direction.
    pub fn set_count(&mut self, direction: Direction, count: u32) {
        self.slot(direction).get_or_insert_with(DirectionConfig::default).count = count;
        self.version += 1;
    }

    fn slot(&mut self, direction: Direction) -> &mut Option<DirectionConfig> {
        match direction {
            Direction::In => &mut self.inputs,
            Direction::Out => &mut self.outputs,
        }
    }

    /// Check that `channel` is addressable in `direction`.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` when the direction is unconfigured, disabled
    /// (count 0) or `channel` is outside `1..=count`.
    pub fn check_channel(&self, channel: u32, direction: Direction) -> Result<&DirectionConfig, GpioError> {
        let config = self.direction(direction).ok_or_else(|| {
            GpioError::ConfigurationError(format!("{direction} addressing not negotiated"))
        })?;
        if config.count == 0 {
            return Err(GpioError::ConfigurationError(format!(
                "{direction} channels are not present"
            )));
        }
        if channel == 0 || channel > config.count {
            return Err(GpioError::ConfigurationError(format!(
                "{} out of range (1..={})",
                direction.port_name(channel),
                config.count
            )));
        }
        Ok(config)
    }

    /// Translate a channel into a physical pin.
    ///
    /// A sparse mapping entry wins over `base + offset + channel`.
    pub fn resolve_pin(&self, channel: u32, direction: Direction) -> Result<u32, GpioError> {
        let config = self.check_channel(channel, direction)?;
        if let Some(pin) = config.mapping.get(&channel) {
            return Ok(*pin);
        }
        let base = self.base_address.ok_or_else(|| {
            GpioError::ConfigurationError("base address not set".to_string())
        })?;
        let pin = i64::from(base) + i64::from(config.offset) + i64::from(channel);
        u32::try_from(pin).map_err(|_| {
            GpioError::ConfigurationError(format!(
                "{} resolves to invalid pin {pin}",
                direction.port_name(channel)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated() -> HardwareConfig {
        let mut hw = HardwareConfig::new();
        hw.apply(
            Direction::In,
            Some(488),
            DirectionConfig { count: 10, offset: -1, mapping: BTreeMap::new() },
        );
        hw.apply(
            Direction::Out,
            Some(488),
            DirectionConfig {
                count: 5,
                offset: 0,
                mapping: BTreeMap::from([(4, 502), (5, 503)]),
            },
        );
        hw
    }

    #[test]
    fn test_linear_resolution() {
        let hw = negotiated();
        assert_eq!(hw.resolve_pin(1, Direction::In).unwrap(), 488);
        assert_eq!(hw.resolve_pin(10, Direction::In).unwrap(), 497);
        assert_eq!(hw.resolve_pin(2, Direction::Out).unwrap(), 490);
    }

    #[test]
    fn test_mapping_wins() {
        let hw = negotiated();
        assert_eq!(hw.resolve_pin(4, Direction::Out).unwrap(), 502);
        assert_eq!(hw.resolve_pin(5, Direction::Out).unwrap(), 503);
    }

    #[test]
    fn test_out_of_range() {
        let hw = negotiated();
        assert!(hw.resolve_pin(0, Direction::In).is_err());
        assert!(hw.resolve_pin(11, Direction::In).is_err());
        assert!(hw.resolve_pin(6, Direction::Out).is_err());
    }

    #[test]
    fn test_unconfigured_and_disabled() {
        let mut hw = HardwareConfig::new();
        assert!(matches!(
            hw.resolve_pin(1, Direction::In),
            Err(GpioError::ConfigurationError(_))
        ));
        hw.apply(Direction::In, Some(488), DirectionConfig::default());
        assert!(hw.check_channel(1, Direction::In).is_err());
        assert!(!hw.is_ready());
    }

    #[test]
    fn test_overrides_bump_version() {
        let mut hw = HardwareConfig::new();
        hw.set_base_address(100);
        hw.set_count(Direction::Out, 4);
        hw.set_offset(Direction::Out, 2);
        assert_eq!(hw.version(), 3);
        assert_eq!(hw.resolve_pin(1, Direction::Out).unwrap(), 103);
        // Base missing is only fatal when no mapping exists.
        let mut unmapped = HardwareConfig::new();
        unmapped.set_count(Direction::In, 1);
        assert!(unmapped.resolve_pin(1, Direction::In).is_err());
    }

    #[test]
    fn test_negative_pin_rejected() {
        let mut hw = HardwareConfig::new();
        hw.apply(
            Direction::In,
            Some(0),
            DirectionConfig { count: 2, offset: -5, mapping: BTreeMap::new() },
        );
        assert!(hw.resolve_pin(1, Direction::In).is_err());
    }

    #[test]
    fn test_state_strings() {
        assert_eq!("open".parse::<GpioState>().unwrap(), GpioState::Open);
        assert_eq!("HIGH".parse::<GpioState>().unwrap(), GpioState::Open);
        assert_eq!("closed".parse::<GpioState>().unwrap(), GpioState::Closed);
        assert_eq!("low".parse::<GpioState>().unwrap(), GpioState::Closed);
        assert!("toggle".parse::<GpioState>().is_err());
        assert_eq!(GpioState::Open.to_string(), "opened");
        assert_eq!(GpioState::from_code(GpioState::Closed.code()), GpioState::Closed);
        assert_eq!(GpioState::from_value_byte(b'x'), GpioState::Unknown);
    }

    #[test]
    fn test_direction_strings() {
        assert_eq!("GPI".parse::<Direction>().unwrap(), Direction::In);
        assert_eq!("out".parse::<Direction>().unwrap(), Direction::Out);
        assert_eq!(Direction::Out.port_name(2), "GPO2");
        assert_eq!(Direction::In.wire_type(), "gpi");
    }
}
