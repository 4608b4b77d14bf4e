//! Peer protocol.
//!
//! Every message is a subject plus an ordered list of string frames. This
//! module turns frames into typed values once, at the boundary, and back.
//!
//! - [`request`] - Requests the agent serves
//! - [`reply`] - `corr_id, OK, ...` / `corr_id, ERROR, reason` replies
//! - [`capability`] - `HW_CAP` handshake with the inventory service
//! - [`stream`] - Payloads published on streams (metrics, alerts, assets)

pub mod capability;
pub mod reply;
pub mod request;
pub mod stream;

pub use capability::{Capability, CapabilityError, CapabilityReply, CapabilityRequest};
pub use reply::{ErrorReason, Reply, ReplyBody};
pub use request::{PeerRequest, RequestError};
pub use stream::{AlertEvent, AlertState, StatusMetric, StreamMessage};
