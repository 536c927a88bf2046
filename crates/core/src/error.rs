//! Outcome codes and the receive-failure classifier.
//!
//! Every public role operation returns one `ErrorCode`. Internal failures are
//! collected into `ReceiveFailure`, and `ReceiveFailure::disposition` decides,
//! in this order:
//!   1. transport failures        -> TEMPORARY_ERROR, nothing sent
//!   2. unauthenticated input     -> PERMANENT_ERROR, silent drop
//!   3. authenticated but invalid -> PERMANENT_ERROR / UNSUPPORTED_MSG_VERSION,
//!                                   one signed Error sent to the peer

use std::fmt;

use crate::envelope::{AuthError, OpenError};
use crate::message::MessageKind;
use crate::session::Phase;
use crate::transport::TransportError;
use crate::version::VersionRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    PermanentError,
    UnsupportedMsgVersion,
    TemporaryError,
}

impl ErrorCode {
    pub fn wire_value(self) -> u64 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::PermanentError => 1,
            ErrorCode::UnsupportedMsgVersion => 4,
            ErrorCode::TemporaryError => 10,
        }
    }

    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::Success),
            1 => Some(ErrorCode::PermanentError),
            4 => Some(ErrorCode::UnsupportedMsgVersion),
            10 => Some(ErrorCode::TemporaryError),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::PermanentError => "PERMANENT_ERROR",
            ErrorCode::UnsupportedMsgVersion => "UNSUPPORTED_MSG_VERSION",
            ErrorCode::TemporaryError => "TEMPORARY_ERROR",
        })
    }
}

/// Authenticated message that breaks a protocol rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("no mutually supported version: offered {offered}, supported {supported}")]
    UnsupportedVersion { offered: VersionRange, supported: VersionRange },
    #[error("unexpected {kind} in phase {phase:?}")]
    UnexpectedMessage { kind: MessageKind, phase: Phase },
    #[error("version already negotiated as {0}")]
    AlreadyNegotiated(u32),
    #[error("token echo does not match the outstanding request")]
    TokenMismatch,
    #[error("challenge echo does not match the issued challenge")]
    ChallengeMismatch,
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiveFailure {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

impl From<AuthError> for ReceiveFailure {
    fn from(e: AuthError) -> Self {
        ReceiveFailure::Open(OpenError::Unauthenticated(e))
    }
}

/// What the receiving role does about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transport-level; report TEMPORARY_ERROR to the caller, send nothing.
    Retry,
    /// Unauthenticated; report PERMANENT_ERROR, send nothing.
    Drop,
    /// Authenticated; send one signed Error carrying this code.
    Report(ErrorCode),
}

impl ReceiveFailure {
    pub fn disposition(&self) -> Disposition {
        match self {
            ReceiveFailure::Transport(_) => Disposition::Retry,
            ReceiveFailure::Open(OpenError::Unauthenticated(_)) => Disposition::Drop,
            ReceiveFailure::Open(OpenError::Undecodable(_)) => {
                Disposition::Report(ErrorCode::PermanentError)
            }
            ReceiveFailure::Protocol(ProtocolViolation::UnsupportedVersion { .. }) => {
                Disposition::Report(ErrorCode::UnsupportedMsgVersion)
            }
            ReceiveFailure::Protocol(_) => Disposition::Report(ErrorCode::PermanentError),
        }
    }

    /// Outcome code the operation returns for this failure.
    pub fn code(&self) -> ErrorCode {
        match self.disposition() {
            Disposition::Retry => ErrorCode::TemporaryError,
            Disposition::Drop => ErrorCode::PermanentError,
            Disposition::Report(code) => code,
        }
    }
}
