//! Error types, mirroring the three severities in spec.md §7.
//!
//! Invariant violations are a distinct type (`UndoPanic`) rather than an
//! `Err` variant: the only correct response to one is to abort the
//! process and let crash recovery rebuild state, so callers are not
//! offered a `Result` they might be tempted to handle gracefully.

use std::fmt;

use crate::types::UndoLogNumber;

/// Recoverable errors: replay-time corruption (elevated to `ERROR`, not
/// `PANIC`, because the WAL source is suspect rather than local memory)
/// and misuse of the public API that does not itself indicate on-disk
/// corruption.
#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    #[error("undo log {log} WAL bufdata decode failed: {reason}")]
    Corruption { log: UndoLogNumber, reason: String },

    #[error("replay ran out of registered blocks while satisfying a carry-over write")]
    ReplayRanOutOfBlocks,

    #[error("replay block registered an rmgr/op combination the type layer does not recognize")]
    UnrecognizedCloseOp,

    #[error("{0}")]
    Other(String),
}

pub type UndoResult<T> = Result<T, UndoError>;

/// An invariant violation (spec.md §7's "invariant violation / programming
/// error" category). Debug builds should `assert!` on the underlying
/// condition before ever constructing one of these; release builds
/// convert it to a `panic!` at the call site via [`UndoPanic::abort`].
#[derive(Debug)]
pub struct UndoPanic {
    message: String,
}

impl UndoPanic {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(invariant_violation = %message, "undo record set invariant violated");
        UndoPanic { message }
    }

    /// Abort the process. There is no recovery path from here short of
    /// a restart, which is the point: forcing a crash guarantees the
    /// next startup's recovery sweep reconstructs consistent state.
    pub fn abort(self) -> ! {
        panic!("undo record set invariant violated: {}", self.message);
    }
}

impl fmt::Display for UndoPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UndoPanic {}

/// Convenience for call sites that want to assert-then-panic in one
/// expression: `undo_assert!(cond, "message {}", x)`.
#[macro_export]
macro_rules! undo_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::error::UndoPanic::new(format!($($arg)+)).abort();
        }
    };
}
