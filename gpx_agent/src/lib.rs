//! # GPX Agent Library
//!
//! GPIO sensor and actuator control engine: polls general-purpose input
//! and output channels, publishes their state as metrics and alerts, and
//! serves peer requests that drive outputs and manage sensor templates.
//!
//! # Module Structure
//!
//! - [`server`] - protocol server actor (owns device I/O)
//! - [`assets`] - asset tracker actor (owns registry writes)
//! - [`bus`] - message-bus seam and its in-process broker
//! - [`capability`] - hardware addressing negotiation
//! - [`gpio`] - sysfs-style channel access
//! - [`registry`] - monitored channels
//! - [`gpo_state`] - output default states and their state file
//! - [`templates`] - template directory
//! - [`control`] - supervisor commands and shared state
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          gpx_agent                               │
//! │  ┌─────────────┐ control ┌──────────────┐ control ┌───────────┐  │
//! │  │ AssetTracker│◄────────│  supervisor  │────────►│ GpioServer│  │
//! │  └──────┬──────┘         │   (main)     │         └─────┬─────┘  │
//! │         │ upsert         └──────────────┘               │ I/O    │
//! │         ▼                                               ▼        │
//! │  ┌──────────────┐  ┌──────────────┐           ┌───────────────┐  │
//! │  │SensorRegistry│  │GpoStateCache │           │  GpioDevice   │  │
//! │  └──────────────┘  └──────────────┘           └───────────────┘  │
//! │         ▲                 ▲    GPOSTATE (bus)                    │
//! │         └───── shared ────┴──── AssetTracker ──► GpioServer      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod assets;
pub mod bus;
pub mod capability;
pub mod control;
pub mod gpio;
pub mod gpo_state;
pub mod registry;
pub mod server;
pub mod templates;

// Re-export key types for convenience
pub use crate::assets::AssetTracker;
pub use crate::bus::{LocalBroker, LocalClient, MessageBus};
pub use crate::control::{ControlCommand, SharedState};
pub use crate::server::{GpioServer, ServerSettings};
