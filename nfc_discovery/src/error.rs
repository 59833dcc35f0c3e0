//! Discovery error taxonomy.
//!
//! Collisions are not errors here: they are values in detection and
//! resolution results. What remains is classified for the poll loop:
//!
//! | Kind | Poll loop |
//! |------|-----------|
//! | `Timeout` | move on (tag absent or removed) |
//! | `Protocol` | surface (fatal for the current tag) |
//! | `Integrity` | surface (Type V maps it to a collision before it gets here) |
//! | `Internal` | surface (invariant violated) |
//! | `Aborted` | surface verbatim |
//! | `Transceiver` | surface verbatim |

use nfc_common::rf::transceiver::RfError;
use thiserror::Error;

/// Error type for detection, resolution and activation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// No response from the addressed tag(s).
    #[error("Timeout")]
    Timeout,

    /// Malformed or unexpected response.
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// CRC, parity or framing error.
    #[error("Integrity error")]
    Integrity,

    /// Engine invariant violated or malformed front-end result.
    #[error("Internal error: {0}")]
    Internal(&'static str),

    /// Exchange aborted by the host.
    #[error("Aborted")]
    Aborted,

    /// Front-end failure, passed through verbatim.
    #[error("Transceiver error: {0}")]
    Transceiver(String),
}

impl PollError {
    /// Whether the poll loop may move on to the next technology.
    #[inline]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<RfError> for PollError {
    fn from(err: RfError) -> Self {
        match err {
            RfError::Timeout => Self::Timeout,
            RfError::Collision(_) => Self::Protocol("unexpected collision"),
            RfError::Crc | RfError::Framing => Self::Integrity,
            RfError::Aborted => Self::Aborted,
            RfError::Unsupported(what) => Self::Internal(what),
            RfError::Io(msg) => Self::Transceiver(msg),
        }
    }
}
