//! Replies to peer requests.

use core::fmt;
use core::str::FromStr;

/// Status frame of a successful reply.
pub const STATUS_OK: &str = "OK";
/// Status frame of a failed reply.
pub const STATUS_ERROR: &str = "ERROR";

/// Reason carried by an `ERROR` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    /// No sensor or template by that name.
    AssetNotFound,
    /// The hardware write failed.
    SetValueFailed,
    /// The requested value is not a state.
    UnknownValue,
    /// The output already holds the requested value, or is not an output.
    ActionNotApplicable,
    /// Unknown subject or unusable request.
    BadCommand,
    /// A required field is absent.
    MissingParam,
    /// Anything else.
    Unknown,
}

impl ErrorReason {
    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssetNotFound => "ASSET_NOT_FOUND",
            Self::SetValueFailed => "SET_VALUE_FAILED",
            Self::UnknownValue => "UNKNOWN_VALUE",
            Self::ActionNotApplicable => "ACTION_NOT_APPLICABLE",
            Self::BadCommand => "BAD_COMMAND",
            Self::MissingParam => "MISSING_PARAM",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorReason {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASSET_NOT_FOUND" => Ok(Self::AssetNotFound),
            "SET_VALUE_FAILED" => Ok(Self::SetValueFailed),
            "UNKNOWN_VALUE" => Ok(Self::UnknownValue),
            "ACTION_NOT_APPLICABLE" => Ok(Self::ActionNotApplicable),
            "BAD_COMMAND" => Ok(Self::BadCommand),
            "MISSING_PARAM" => Ok(Self::MissingParam),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("unknown error reason: {s:?}")),
        }
    }
}

/// Outcome part of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// `OK` followed by payload frames.
    Ok(Vec<String>),
    /// `ERROR` followed by the reason.
    Error(ErrorReason),
}

/// Reply to a peer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Echo of the client's correlation token, when it sent one.
    pub correlation_id: Option<String>,
    /// Outcome.
    pub body: ReplyBody,
}

impl Reply {
    /// Successful reply.
    pub fn ok(correlation_id: Option<String>, payload: Vec<String>) -> Self {
        Self {
            correlation_id,
            body: ReplyBody::Ok(payload),
        }
    }

    /// Failed reply.
    pub fn error(correlation_id: Option<String>, reason: ErrorReason) -> Self {
        Self {
            correlation_id,
            body: ReplyBody::Error(reason),
        }
    }

    /// Whether the reply is `OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self.body, ReplyBody::Ok(_))
    }

    /// Error reason, if failed.
    pub fn reason(&self) -> Option<ErrorReason> {
        match self.body {
            ReplyBody::Error(reason) => Some(reason),
            ReplyBody::Ok(_) => None,
        }
    }

    /// Encode as frames.
    pub fn to_frames(&self) -> Vec<String> {
        let mut frames = Vec::new();
        if let Some(corr) = &self.correlation_id {
            frames.push(corr.clone());
        }
        match &self.body {
            ReplyBody::Ok(payload) => {
                frames.push(STATUS_OK.to_string());
                frames.extend(payload.iter().cloned());
            }
            ReplyBody::Error(reason) => {
                frames.push(STATUS_ERROR.to_string());
                frames.push(reason.as_str().to_string());
            }
        }
        frames
    }

    /// Decode frames of a reply that starts with a correlation token.
    pub fn from_frames(frames: &[String]) -> Option<Self> {
        let (corr, rest) = frames.split_first()?;
        let (status, payload) = rest.split_first()?;
        let body = match status.as_str() {
            STATUS_OK => ReplyBody::Ok(payload.to_vec()),
            STATUS_ERROR => {
                let reason = payload
                    .first()
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(ErrorReason::Unknown);
                ReplyBody::Error(reason)
            }
            _ => return None,
        };
        Some(Self {
            correlation_id: Some(corr.clone()),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reply_frames() {
        let reply = Reply::error(Some("42".into()), ErrorReason::AssetNotFound);
        assert_eq!(reply.to_frames(), vec!["42", "ERROR", "ASSET_NOT_FOUND"]);
        assert_eq!(Reply::from_frames(&reply.to_frames()), Some(reply));
    }

    #[test]
    fn test_ok_reply_without_correlation() {
        let reply = Reply::ok(None, vec!["a".into()]);
        assert_eq!(reply.to_frames(), vec!["OK", "a"]);
    }

    #[test]
    fn test_from_frames_rejects_garbage() {
        assert_eq!(Reply::from_frames(&["1".to_string()]), None);
        assert_eq!(
            Reply::from_frames(&["1".to_string(), "MAYBE".to_string()]),
            None
        );
    }

    #[test]
    fn test_reason_round_trip() {
        for reason in [
            ErrorReason::AssetNotFound,
            ErrorReason::SetValueFailed,
            ErrorReason::UnknownValue,
            ErrorReason::ActionNotApplicable,
            ErrorReason::BadCommand,
            ErrorReason::MissingParam,
            ErrorReason::Unknown,
        ] {
            assert_eq!(reason.as_str().parse::<ErrorReason>(), Ok(reason));
        }
    }
}
