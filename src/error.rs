//! Error taxonomy surfaced by the public API.
//!
//! Every fallible operation on [`crate::Cbs`] returns one of these variants.
//! Conditions that the original design treats as programming errors —
//! misaligned addresses, `base >= limit`, calling a public method while
//! already inside one (re-entrance) — are never turned into an error
//! variant here either; they are asserted, matching the source's own
//! `AVER`/`NOTREACHED` split between recoverable and fatal conditions.

use thiserror::Error;

/// Errors returned by [`crate::Cbs`] operations.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CbsError {
    /// The node pool (or, when inline fallback is disabled, the only
    /// storage available) could not supply a node for this operation.
    #[error("allocation failed: node pool exhausted")]
    AllocFail,

    /// The requested range overlaps an existing tracked range in a way
    /// that cannot be resolved by coalescing: inserting a range whose
    /// `base` falls inside an already-tracked range, or that runs into
    /// its right neighbour, or deleting a range that only partially
    /// overlaps the block containing it.
    #[error("range conflicts with an existing tracked range")]
    Conflict,

    /// The requested range is not currently tracked by the structure.
    #[error("range not found")]
    NotFound,

    /// Reserved for `Describe`-style operations that write through a
    /// caller-supplied sink.
    #[error("I/O error while describing structure")]
    IoErr,
}

/// Convenience alias used throughout the crate.
pub type CbsResult<T> = Result<T, CbsError>;
