//! Error types for rmxfer.

use crate::frame::{DecodeError, EncodeError, ValidationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Coarse failure classes reported in [`TransferOutcome`]s and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    LinkUnavailable,
    ResponseTimeout,
    ProtocolViolation,
    ModemDialFailure,
    TransferAborted,
}

/// Errors raised by links, the handshake, the modem dialog and transfers.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport is closed or could not be reached.
    #[error("link unavailable: {0}")]
    LinkUnavailable(String),

    /// No bytes arrived for the whole deadline.
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    /// Bad marker, bad checksum or unexpected token.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A metadata frame could not be sliced.
    #[error("{0}")]
    Malformed(#[from] DecodeError),

    /// A metadata frame was sliced but failed validation.
    #[error("invalid frame: {0}")]
    Invalid(#[from] ValidationError),

    /// The local file cannot be described by a frame.
    #[error("cannot describe file: {0}")]
    Encode(#[from] EncodeError),

    /// The AT dialog did not reach the expected state.
    #[error("modem dial failure: {0}")]
    ModemDialFailure(String),

    /// The block transfer gave up.
    #[error("transfer aborted: {0}")]
    TransferAborted(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::LinkUnavailable(_) | Error::Io(_) => ErrorKind::LinkUnavailable,
            Error::ResponseTimeout(_) => ErrorKind::ResponseTimeout,
            Error::ProtocolViolation(_) | Error::Malformed(_) | Error::Invalid(_) | Error::Encode(_) => {
                ErrorKind::ProtocolViolation
            }
            Error::ModemDialFailure(_) => ErrorKind::ModemDialFailure,
            Error::TransferAborted(_) => ErrorKind::TransferAborted,
        }
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Error::LinkUnavailable(e.to_string())
    }
}

/// Result type for rmxfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What one handshake plus bulk transfer achieved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub success: bool,
    pub bytes_transferred: u64,
    pub error_kind: Option<ErrorKind>,
}

impl TransferOutcome {
    pub fn completed(bytes: u64) -> Self {
        Self {
            success: true,
            bytes_transferred: bytes,
            error_kind: None,
        }
    }

    pub fn failed(err: &Error) -> Self {
        Self {
            success: false,
            bytes_transferred: 0,
            error_kind: Some(err.kind()),
        }
    }
}
