//! Core error type.
//!
//! The data-model layer can fail in exactly one way visible to callers:
//! pool exhaustion. Everything else (flavor mismatches, double frees,
//! reads of freed nodes) is a programmer error and panics with a message
//! rather than flowing through `Result`.

use std::{error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A pool hit its configured slot ceiling and the free list was empty.
    OutOfMemory { live: u64, limit: usize },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::OutOfMemory { live, limit } => {
                write!(f, "node pool exhausted ({} live, limit {})", live, limit)
            }
        }
    }
}

impl error::Error for CoreError {}
