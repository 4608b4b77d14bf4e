//! Prelude for convenient imports.
//!
//! ```rust
//! use gpx_common::prelude::*;
//! ```

pub use crate::asset::{AssetEvent, AssetOperation, AssetStatus};
pub use crate::config::{AgentConfig, ConfigError, ConfigLoader, HardwareOverrides, LogLevel};
pub use crate::consts::*;
pub use crate::gpio::{Direction, DirectionConfig, GpioError, GpioState, HardwareConfig};
pub use crate::protocol::{
    AlertEvent, AlertState, Capability, CapabilityReply, CapabilityRequest, ErrorReason,
    PeerRequest, Reply, RequestError, StatusMetric, StreamMessage,
};
pub use crate::template::{SensorTemplate, TemplateDescriptor};
