//! Capability negotiation.
//!
//! Asks the inventory service, once per direction, how many channels exist
//! and how they map onto pins, and installs the answer into the shared
//! [`HardwareConfig`]. A failed direction keeps whatever configuration it
//! had; the engine stays unconfigured for it until a later negotiation
//! succeeds.

use crate::bus::{BusError, MessageBus};
use gpx_common::consts::subject;
use gpx_common::gpio::{Direction, HardwareConfig};
use gpx_common::protocol::{Capability, CapabilityError, CapabilityReply, CapabilityRequest};
use parking_lot::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Negotiation failure for one direction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// No reply within the bound.
    #[error("{0} capability request timed out")]
    Timeout(Direction),

    /// The reply answers another request.
    #[error("correlation mismatch: expected {expected}, received {received}")]
    ProtocolMismatch {
        /// Sent token.
        expected: String,
        /// Received token.
        received: String,
    },

    /// The reply describes the other direction.
    #[error("asked for {expected}, got {received}")]
    WrongDirection {
        /// Asked.
        expected: Direction,
        /// Received.
        received: Direction,
    },

    /// The inventory answered with an error.
    #[error("{direction} capability unavailable: {reason}")]
    Unavailable {
        /// Direction asked.
        direction: Direction,
        /// Reason frame.
        reason: String,
    },

    /// The reply could not be decoded.
    #[error(transparent)]
    Malformed(#[from] CapabilityError),

    /// The request could not be sent.
    #[error("bus error: {0}")]
    Bus(BusError),
}

/// Outcome of a full negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationReport {
    /// Input direction.
    pub inputs: Result<Capability, NegotiationError>,
    /// Output direction.
    pub outputs: Result<Capability, NegotiationError>,
    /// Both directions configured after this round.
    pub ready: bool,
}

/// Query one direction.
pub fn negotiate_direction(
    bus: &mut dyn MessageBus,
    inventory: &str,
    direction: Direction,
    timeout: Duration,
) -> Result<Capability, NegotiationError> {
    let request = CapabilityRequest {
        correlation_id: Uuid::new_v4().to_string(),
        direction,
    };
    let frames = bus
        .request(inventory, subject::HW_CAP, request.to_frames(), timeout)
        .map_err(|e| match e {
            BusError::Timeout => NegotiationError::Timeout(direction),
            other => NegotiationError::Bus(other),
        })?;

    let (received, reply) = CapabilityReply::from_frames(&frames)?;
    if received != request.correlation_id {
        return Err(NegotiationError::ProtocolMismatch {
            expected: request.correlation_id,
            received,
        });
    }
    match reply {
        CapabilityReply::Unavailable { reason } => {
            Err(NegotiationError::Unavailable { direction, reason })
        }
        CapabilityReply::Available(cap) if cap.direction != direction => {
            Err(NegotiationError::WrongDirection {
                expected: direction,
                received: cap.direction,
            })
        }
        CapabilityReply::Available(cap) => Ok(cap),
    }
}

/// Query both directions and install every successful answer.
pub fn negotiate(
    bus: &mut dyn MessageBus,
    inventory: &str,
    hardware: &RwLock<HardwareConfig>,
    timeout: Duration,
) -> NegotiationReport {
    let mut query = |direction: Direction| {
        let result = negotiate_direction(&mut *bus, inventory, direction, timeout);
        match &result {
            Ok(cap) => {
                hardware
                    .write()
                    .apply(direction, cap.base_address, cap.direction_config());
                info!(
                    "{} capability: count={} base={:?} offset={} mapped={}",
                    direction,
                    cap.count,
                    cap.base_address,
                    cap.offset,
                    cap.mapping.len()
                );
            }
            Err(e) => warn!("{} capability negotiation failed: {}", direction, e),
        }
        result
    };

    let inputs = query(Direction::In);
    let outputs = query(Direction::Out);
    let ready = hardware.read().is_ready();
    if ready {
        info!("Hardware addressing ready");
    }
    NegotiationReport {
        inputs,
        outputs,
        ready,
    }
}
