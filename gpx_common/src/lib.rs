//! # GPX Common Library
//!
//! Shared types for the GPX workspace: everything the agent and its peers
//! must agree on.
//!
//! # Module Structure
//!
//! - [`consts`] - Defaults, timeouts and protocol subject names
//! - [`config`] - TOML configuration loading and the agent configuration
//! - [`gpio`] - Channel directions, tri-state values and pin addressing
//! - [`template`] - Sensor template descriptors keyed by part number
//! - [`asset`] - Asset-inventory events consumed by the agent
//! - [`protocol`] - Peer requests, replies, capability handshake and stream payloads

#![warn(missing_docs)]

pub mod asset;
pub mod config;
pub mod consts;
pub mod gpio;
pub mod prelude;
pub mod protocol;
pub mod template;
