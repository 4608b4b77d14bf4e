//! `HW_CAP` handshake with the inventory service.
//!
//! Request: `corr_id, type` where type is `gpi` or `gpo`.
//!
//! Reply:
//! - `corr_id, OK, type, count` when count is 0
//! - `corr_id, OK, type, count, base_address, offset, (pN, pin)*` otherwise
//! - `corr_id, ERROR, reason`

use super::reply::{STATUS_ERROR, STATUS_OK};
use crate::gpio::{Direction, DirectionConfig};
use std::collections::BTreeMap;
use thiserror::Error;

/// Undecodable handshake message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Frame missing or not a number.
    #[error("malformed capability message: {0}")]
    Malformed(String),
}

/// Capability request for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequest {
    /// Correlation token.
    pub correlation_id: String,
    /// Direction asked about.
    pub direction: Direction,
}

impl CapabilityRequest {
    /// Encode as frames.
    pub fn to_frames(&self) -> Vec<String> {
        vec![
            self.correlation_id.clone(),
            self.direction.wire_type().to_string(),
        ]
    }

    /// Decode, on the inventory side.
    pub fn from_frames(frames: &[String]) -> Result<Self, CapabilityError> {
        let correlation_id = frames
            .first()
            .cloned()
            .ok_or_else(|| CapabilityError::Malformed("missing correlation id".into()))?;
        let direction = frames
            .get(1)
            .ok_or_else(|| CapabilityError::Malformed("missing type".into()))?
            .parse()
            .map_err(CapabilityError::Malformed)?;
        Ok(Self { correlation_id, direction })
    }
}

/// Addressing announced for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    /// Direction described.
    pub direction: Direction,
    /// Channel count; 0 disables the direction.
    pub count: u32,
    /// Base address (absent when count is 0).
    pub base_address: Option<i32>,
    /// Signed offset.
    pub offset: i32,
    /// Channel to pin remappings.
    pub mapping: BTreeMap<u32, u32>,
}

impl Capability {
    /// Addressing to install into the hardware configuration.
    pub fn direction_config(&self) -> DirectionConfig {
        DirectionConfig {
            count: self.count,
            offset: self.offset,
            mapping: self.mapping.clone(),
        }
    }
}

/// Decoded handshake reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityReply {
    /// Addressing is known.
    Available(Capability),
    /// The inventory refused.
    Unavailable {
        /// Reason frame.
        reason: String,
    },
}

impl CapabilityReply {
    /// Encode with the given correlation token.
    pub fn to_frames(&self, correlation_id: &str) -> Vec<String> {
        let mut frames = vec![correlation_id.to_string()];
        match self {
            Self::Unavailable { reason } => {
                frames.push(STATUS_ERROR.to_string());
                frames.push(reason.clone());
            }
            Self::Available(cap) => {
                frames.push(STATUS_OK.to_string());
                frames.push(cap.direction.wire_type().to_string());
                frames.push(cap.count.to_string());
                if cap.count > 0 {
                    frames.push(cap.base_address.unwrap_or_default().to_string());
                    frames.push(cap.offset.to_string());
                    for (channel, pin) in &cap.mapping {
                        frames.push(format!("p{channel}"));
                        frames.push(pin.to_string());
                    }
                }
            }
        }
        frames
    }

    /// Decode a reply, returning its correlation token alongside.
    pub fn from_frames(frames: &[String]) -> Result<(String, Self), CapabilityError> {
        let mut it = frames.iter();
        let mut next = |what: &str| {
            it.next()
                .cloned()
                .ok_or_else(|| CapabilityError::Malformed(format!("missing {what}")))
        };

        let correlation_id = next("correlation id")?;
        let status = next("status")?;
        if status == STATUS_ERROR {
            let reason = next("reason").unwrap_or_default();
            return Ok((correlation_id, Self::Unavailable { reason }));
        }
        if status != STATUS_OK {
            return Err(CapabilityError::Malformed(format!("unexpected status {status:?}")));
        }

        let direction: Direction = next("type")?.parse().map_err(CapabilityError::Malformed)?;
        let count: u32 = parse_number(&next("count")?, "count")?;
        let mut cap = Capability {
            direction,
            count,
            base_address: None,
            offset: 0,
            mapping: BTreeMap::new(),
        };
        if count > 0 {
            cap.base_address = Some(parse_number(&next("base address")?, "base address")?);
            cap.offset = parse_number(&next("offset")?, "offset")?;
            drop(next);
            let rest: Vec<&String> = it.collect();
            for pair in rest.chunks(2) {
                let [port, pin] = pair else {
                    return Err(CapabilityError::Malformed("dangling mapping entry".into()));
                };
                let channel = port.strip_prefix('p').unwrap_or(port);
                cap.mapping.insert(
                    parse_number(channel, "mapped channel")?,
                    parse_number(pin, "mapped pin")?,
                );
            }
        }
        Ok((correlation_id, Self::Available(cap)))
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, CapabilityError> {
    value
        .trim()
        .parse()
        .map_err(|_| CapabilityError::Malformed(format!("invalid {what}: {value:?}")))
}
