use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    Configuration,
    HardwareUnavailable,
    RequestFailed,
    Timeout,
    Connection,
    NotSupportedOffline,
    ClockUnavailable,
    QueueExhausted,
    Storage,
    Payload,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{device} unavailable after {attempts} attempt(s): {detail}")]
    HardwareUnavailable {
        device: &'static str,
        attempts: u32,
        detail: String,
    },

    #[error("request failed with HTTP {status}")]
    RequestFailed { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{0} requests are not supported offline")]
    NotSupportedOffline(&'static str),

    #[error("trusted clock is not set")]
    ClockUnavailable,

    #[error("no free queue slot left for timestamp {0}")]
    QueueExhausted(String),

    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    #[error("malformed payload: {0}")]
    Payload(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::HardwareUnavailable { .. } => ErrorKind::HardwareUnavailable,
            Self::RequestFailed { .. } => ErrorKind::RequestFailed,
            Self::Timeout => ErrorKind::Timeout,
            Self::Connection(_) => ErrorKind::Connection,
            Self::NotSupportedOffline(_) => ErrorKind::NotSupportedOffline,
            Self::ClockUnavailable => ErrorKind::ClockUnavailable,
            Self::QueueExhausted(_) => ErrorKind::QueueExhausted,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Payload(_) => ErrorKind::Payload,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status } => Some(*status),
            _ => None,
        }
    }

    /// True when the remote could not be reached at all, as opposed to the
    /// remote rejecting one request.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection(_))
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn payload(message: impl Into<String>) -> Self {
        Self::Payload(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

/// Failure reported by a hardware collaborator. Only `NotReady` is worth
/// retrying.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum HardwareError {
    #[error("device not ready")]
    NotReady,
    #[error("device fault: {0}")]
    Fault(String),
}
