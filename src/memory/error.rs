//! Error types for the memory subsystem.
//!
//! The allocators themselves never panic across their API boundary — capacity
//! exhaustion, lifecycle misuse, and not-found lookups are all expressed as
//! `None`/`false`. These types exist for the one place the bool/option surface
//! can't express cleanly (`SizedAllocator::allocate`'s low-level path) and for
//! construction-time configuration validation.

use thiserror::Error;

/// Construction-time validation failure: a required config field was zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field that must be non-zero was zero.
    #[error("config field `{field}` must be non-zero")]
    ZeroField {
        /// Name of the offending field.
        field: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn zero(field: &'static str) -> Self {
        ConfigError::ZeroField { field }
    }
}

/// Low-level allocator failure. Callers above `SizedAllocator` translate this
/// into `Option`/`bool` at their own API boundary (see DESIGN.md, "Exception
/// -> Result").
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The size class responsible for this request has no free blocks.
    #[error("out of memory: size class for {requested} bytes is exhausted")]
    OutOfMemory {
        /// Size that was requested.
        requested: usize,
    },
}

/// Coordinator-level failure, used by call sites that want a reason rather
/// than a bare `bool`. The public surface named in the external-interfaces
/// section still returns plain `bool`/`Option` everywhere the spec says so;
/// this type backs the internal `Result`-returning helpers those methods are
/// built from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The coordinator is not in a state that permits this operation.
    #[error("coordinator is not running")]
    NotRunning,
    /// An order/transaction field failed validation.
    #[error("invalid order: {reason}")]
    InvalidOrder {
        /// Human-readable reason.
        reason: &'static str,
    },
    /// The calling thread has no active transaction to commit/roll back.
    #[error("no active transaction for calling thread")]
    NoActiveTransaction,
    /// An allocator composed by the coordinator has no remaining capacity.
    #[error("capacity exhausted")]
    CapacityExhausted,
}
