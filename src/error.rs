//! Error and result types for the allocator.
//!
//! Every fallible public operation returns [`Result`]; nothing inside the
//! core catches and swallows an error (spec §7).

use thiserror::Error;

/// Errors raised by the tuple allocator.
#[derive(Debug, Error)]
pub enum Error {
    /// `free`/`remove_add` was given an address not owned by any chunk in
    /// the relevant view.
    #[error("address {addr:#x} is out of range for this allocator")]
    OutOfRange {
        /// The address that failed to resolve to an owning chunk.
        addr: usize,
    },

    /// An operation that requires at least one live tuple was attempted on
    /// an empty allocator or list.
    #[error("{op}: allocator is empty")]
    Underflow {
        /// Name of the operation that underflowed.
        op: &'static str,
    },

    /// A batch-delete invariant was violated: the number of holes and the
    /// number of movers did not match. This is a programming error inside
    /// the core, not a recoverable caller mistake.
    #[error("batch remove invariant violated: expected {expected} holes, found {found}")]
    Overflow {
        /// Holes/movers expected from `remove_reserve`'s count.
        expected: usize,
        /// Holes/movers actually computed.
        found: usize,
    },

    /// An operation was attempted in a state that forbids it (double
    /// freeze/thaw, head-remove while frozen, two RW snapshot iterators on
    /// one allocator, unfinished batch before `clear`, ...).
    #[error("logic error: {0}")]
    Logic(&'static str),

    /// Allocator-internal invariant failure that doesn't fit another
    /// category; always a programming error, never a caller mistake.
    #[error("internal allocator error: {0}")]
    Internal(String),

    /// Config loading failed.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
