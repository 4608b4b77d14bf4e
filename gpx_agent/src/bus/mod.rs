//! Message-bus seam.
//!
//! The engine only needs four things from a transport: a named mailbox for
//! point-to-point requests, request/response with a bound, a producer
//! stream to publish on and a filtered consumer stream. [`MessageBus`] is
//! that contract; [`local`] implements it in-process.

pub mod local;

pub use local::{LocalBroker, LocalClient};

use crossbeam::channel::{Receiver, Sender};
use gpx_common::protocol::StreamMessage;
use std::time::Duration;
use thiserror::Error;

// ─── Error Types ────────────────────────────────────────────────────

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// `connect` has not succeeded yet.
    #[error("not connected")]
    NotConnected,

    /// Nothing is listening at the endpoint.
    #[error("no broker bound at {0}")]
    NoEndpoint(String),

    /// No mailbox with that name.
    #[error("unknown address: {0}")]
    UnknownAddress(String),

    /// Publishing requires a producer stream.
    #[error("no producer stream set")]
    NoProducer,

    /// Consumer pattern is not a valid regular expression.
    #[error("invalid subscription pattern: {0}")]
    InvalidPattern(String),

    /// No reply within the bound.
    #[error("request timed out")]
    Timeout,

    /// The peer went away without answering.
    #[error("peer disconnected")]
    Disconnected,
}

// ─── Messages ───────────────────────────────────────────────────────

/// Point-to-point message.
#[derive(Debug, Clone)]
pub struct Mail {
    /// Sender's mailbox.
    pub sender: String,
    /// Subject.
    pub subject: String,
    /// Frames.
    pub frames: Vec<String>,
    reply_to: Option<Sender<Vec<String>>>,
}

impl Mail {
    /// Message whose reply goes to the sender's mailbox.
    pub fn new(sender: impl Into<String>, subject: impl Into<String>, frames: Vec<String>) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
            frames,
            reply_to: None,
        }
    }

    /// Message whose reply goes to a dedicated channel.
    pub fn with_reply_channel(mut self, reply_to: Sender<Vec<String>>) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Dedicated reply channel, if any.
    pub fn reply_channel(&self) -> Option<&Sender<Vec<String>>> {
        self.reply_to.as_ref()
    }
}

/// Message received from a consumer stream.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stream name.
    pub stream: String,
    /// Publisher's mailbox.
    pub sender: String,
    /// Subject.
    pub subject: String,
    /// Payload.
    pub message: StreamMessage,
}

// ─── Transport Trait ────────────────────────────────────────────────

/// Transport used by the agent's actors.
///
/// A client belongs to exactly one actor and is driven from that actor's
/// thread only.
pub trait MessageBus: Send {
    /// Connect to `endpoint` and claim the mailbox `address`.
    fn connect(&mut self, endpoint: &str, address: &str) -> Result<(), BusError>;

    /// Mailbox name once connected.
    fn address(&self) -> Option<&str>;

    /// Select the stream `publish` writes to.
    fn set_producer(&mut self, stream: &str) -> Result<(), BusError>;

    /// Subscribe to `stream`, keeping subjects matching `pattern`.
    fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<(), BusError>;

    /// Incoming point-to-point messages (never ready before `connect`).
    fn mailbox(&self) -> Receiver<Mail>;

    /// Incoming stream messages.
    fn deliveries(&self) -> Receiver<Delivery>;

    /// Publish on the producer stream.
    fn publish(&mut self, subject: &str, message: StreamMessage) -> Result<(), BusError>;

    /// Send to a mailbox without waiting.
    fn send(&mut self, address: &str, subject: &str, frames: Vec<String>) -> Result<(), BusError>;

    /// Answer a received message.
    fn reply(&mut self, to: &Mail, subject: &str, frames: Vec<String>) -> Result<(), BusError>;

    /// Send to a mailbox and wait at most `timeout` for the answer.
    fn request(
        &mut self,
        address: &str,
        subject: &str,
        frames: Vec<String>,
        timeout: Duration,
    ) -> Result<Vec<String>, BusError>;
}
