//! Requests served by the agent.
//!
//! [`PeerRequest::parse`] is the only place frames are interpreted; the
//! dispatcher matches on the resulting variant.

use crate::consts::subject;
use crate::gpio::GpioState;
use crate::template::TemplateDescriptor;
use thiserror::Error;

/// A request that could not be turned into a [`PeerRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Subject not served by the agent.
    #[error("unknown subject {subject:?}")]
    UnknownSubject {
        /// Received subject.
        subject: String,
        /// First frame, echoed in the reply.
        correlation_id: Option<String>,
    },

    /// A required frame is missing or empty.
    #[error("{subject}: missing {field}")]
    MissingParam {
        /// Subject.
        subject: &'static str,
        /// Correlation token, if it was present.
        correlation_id: Option<String>,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A frame has an unusable value.
    #[error("{subject}: {reason}")]
    Malformed {
        /// Subject.
        subject: &'static str,
        /// Correlation token, if it was present.
        correlation_id: Option<String>,
        /// What is wrong.
        reason: String,
    },
}

impl RequestError {
    /// Correlation token to echo.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::UnknownSubject { correlation_id, .. }
            | Self::MissingParam { correlation_id, .. }
            | Self::Malformed { correlation_id, .. } => correlation_id.as_deref(),
        }
    }

    /// Whether the failed request would have been answered.
    pub fn expects_reply(&self) -> bool {
        match self {
            Self::UnknownSubject { .. } => true,
            Self::MissingParam { subject, .. } | Self::Malformed { subject, .. } => {
                *subject != subject::GPOSTATE
            }
        }
    }
}

/// Typed peer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRequest {
    /// Drive an output: `corr_id, sensor_id, action`.
    OutputInteraction {
        /// Correlation token.
        correlation_id: String,
        /// Asset name or display name.
        sensor_id: String,
        /// Requested state, unparsed.
        action: String,
    },
    /// Full descriptors: `corr_id, part_number*`.
    Manifest {
        /// Correlation token.
        correlation_id: String,
        /// Part numbers; empty enumerates the whole store.
        part_numbers: Vec<String>,
    },
    /// Part number and manufacturer: `corr_id, part_number*`.
    ManifestSummary {
        /// Correlation token.
        correlation_id: String,
        /// Part numbers; empty enumerates the whole store.
        part_numbers: Vec<String>,
    },
    /// Create a template file.
    TemplateAdd {
        /// Correlation token.
        correlation_id: String,
        /// Descriptor fields as received.
        descriptor: TemplateDescriptor,
    },
    /// Output default-state configuration, never answered:
    /// `asset_name, channel_or_minus1, default_state`.
    OutputDefault {
        /// Output asset.
        asset_name: String,
        /// Output channel; `None` (wire `-1`) deletes the entry.
        channel: Option<u32>,
        /// Default state.
        default_state: GpioState,
    },
}

impl PeerRequest {
    /// Parse a received message.
    pub fn parse(subject_name: &str, frames: &[String]) -> Result<Self, RequestError> {
        let frame = |i: usize| frames.get(i).map(String::as_str).filter(|f| !f.is_empty());
        let corr = frame(0).map(str::to_string);

        match subject_name {
            subject::GPO_INTERACTION => {
                let s = subject::GPO_INTERACTION;
                let correlation_id = require(s, &corr, corr.clone(), "correlation id")?;
                let sensor_id = require(s, &corr, frame(1).map(str::to_string), "sensor id")?;
                let action = require(s, &corr, frame(2).map(str::to_string), "action")?;
                Ok(Self::OutputInteraction { correlation_id, sensor_id, action })
            }
            subject::GPIO_MANIFEST | subject::GPIO_MANIFEST_SUMMARY => {
                let summary = subject_name == subject::GPIO_MANIFEST_SUMMARY;
                let s = if summary { subject::GPIO_MANIFEST_SUMMARY } else { subject::GPIO_MANIFEST };
                let correlation_id = require(s, &corr, corr.clone(), "correlation id")?;
                let part_numbers = frames
                    .iter()
                    .skip(1)
                    .filter(|f| !f.is_empty())
                    .cloned()
                    .collect();
                if summary {
                    Ok(Self::ManifestSummary { correlation_id, part_numbers })
                } else {
                    Ok(Self::Manifest { correlation_id, part_numbers })
                }
            }
            subject::GPIO_TEMPLATE_ADD => {
                let s = subject::GPIO_TEMPLATE_ADD;
                let correlation_id = require(s, &corr, corr.clone(), "correlation id")?;
                let field = |i| frame(i).map(str::to_string);
                let descriptor = TemplateDescriptor {
                    part_number: field(1),
                    manufacturer: field(2),
                    sensor_type: field(3),
                    normal_state: field(4),
                    direction: field(5),
                    power_source: field(6),
                    alarm_severity: field(7),
                    alarm_message: field(8),
                };
                Ok(Self::TemplateAdd { correlation_id, descriptor })
            }
            subject::GPOSTATE => {
                let s = subject::GPOSTATE;
                let asset_name = require(s, &None, frame(0).map(str::to_string), "asset name")?;
                let raw_channel = require(s, &None, frame(1).map(str::to_string), "channel")?;
                let channel = match raw_channel.trim().parse::<i64>() {
                    Ok(-1) => Some(None),
                    Ok(n) => u32::try_from(n).ok().filter(|&n| n > 0).map(Some),
                    Err(_) => None,
                }
                .ok_or_else(|| RequestError::Malformed {
                    subject: s,
                    correlation_id: None,
                    reason: format!("invalid channel {raw_channel:?}"),
                })?;
                let default_state = match (channel, frame(2).map(str::parse::<GpioState>)) {
                    (_, Some(Ok(state))) => state,
                    (None, _) => GpioState::Unknown,
                    (Some(_), other) => {
                        return Err(RequestError::Malformed {
                            subject: s,
                            correlation_id: None,
                            reason: match other {
                                Some(Err(e)) => e,
                                _ => "missing default state".to_string(),
                            },
                        });
                    }
                };
                Ok(Self::OutputDefault { asset_name, channel, default_state })
            }
            other => Err(RequestError::UnknownSubject {
                subject: other.to_string(),
                correlation_id: corr,
            }),
        }
    }

    /// Subject this request travels under.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::OutputInteraction { .. } => subject::GPO_INTERACTION,
            Self::Manifest { .. } => subject::GPIO_MANIFEST,
            Self::ManifestSummary { .. } => subject::GPIO_MANIFEST_SUMMARY,
            Self::TemplateAdd { .. } => subject::GPIO_TEMPLATE_ADD,
            Self::OutputDefault { .. } => subject::GPOSTATE,
        }
    }

    /// Whether the agent answers this request.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::OutputDefault { .. })
    }

    /// Correlation token, for requests that carry one.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::OutputInteraction { correlation_id, .. }
            | Self::Manifest { correlation_id, .. }
            | Self::ManifestSummary { correlation_id, .. }
            | Self::TemplateAdd { correlation_id, .. } => Some(correlation_id),
            Self::OutputDefault { .. } => None,
        }
    }

    /// Encode as frames, for peers sending the request.
    pub fn to_frames(&self) -> Vec<String> {
        match self {
            Self::OutputInteraction { correlation_id, sensor_id, action } => {
                vec![correlation_id.clone(), sensor_id.clone(), action.clone()]
            }
            Self::Manifest { correlation_id, part_numbers }
            | Self::ManifestSummary { correlation_id, part_numbers } => {
                let mut frames = vec![correlation_id.clone()];
                frames.extend(part_numbers.iter().cloned());
                frames
            }
            Self::TemplateAdd { correlation_id, descriptor } => {
                let d = descriptor.clone();
                vec![
                    correlation_id.clone(),
                    d.part_number.unwrap_or_default(),
                    d.manufacturer.unwrap_or_default(),
                    d.sensor_type.unwrap_or_default(),
                    d.normal_state.unwrap_or_default(),
                    d.direction.unwrap_or_default(),
                    d.power_source.unwrap_or_default(),
                    d.alarm_severity.unwrap_or_default(),
                    d.alarm_message.unwrap_or_default(),
                ]
            }
            Self::OutputDefault { asset_name, channel, default_state } => vec![
                asset_name.clone(),
                channel.map_or_else(|| "-1".to_string(), |c| c.to_string()),
                default_state.as_str().to_string(),
            ],
        }
    }
}

fn require(
    subject: &'static str,
    corr: &Option<String>,
    value: Option<String>,
    field: &'static str,
) -> Result<String, RequestError> {
    value.ok_or_else(|| RequestError::MissingParam {
        subject,
        correlation_id: corr.clone(),
        field,
    })
}
