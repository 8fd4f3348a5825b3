//! Error types surfaced across the crate's public boundary.
//!
//! Internal control-flow signals (search abort, forced move) are
//! plain `Result` types local to [`crate::search`]; they never
//! escape to a caller of this module, so they are not `EngineError`
//! variants.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed FEN passed to `set_fen`.
    BadFen,
    /// UCI move text that does not name a legal move in the current
    /// position.
    BadMove,
    /// A `setoption Hash` value exceeds what the process can
    /// allocate; the table was sized to the largest feasible power
    /// of two instead.
    OversizedAllocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn bad_fen<S: Into<String>>(message: S) -> EngineError {
        EngineError {
            kind: ErrorKind::BadFen,
            message: message.into(),
        }
    }

    pub fn bad_move<S: Into<String>>(message: S) -> EngineError {
        EngineError {
            kind: ErrorKind::BadMove,
            message: message.into(),
        }
    }

    pub fn oversized_allocation<S: Into<String>>(message: S) -> EngineError {
        EngineError {
            kind: ErrorKind::OversizedAllocation,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<crate::basetypes::BadFen> for EngineError {
    fn from(_: crate::basetypes::BadFen) -> EngineError {
        EngineError::bad_fen("malformed FEN")
    }
}
