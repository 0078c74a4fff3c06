//! Physics Error Types
//!
//! Structural operations on a space (adding objects, editing shapes,
//! creating joints) return `Result<T, PhysicsError>`. Getter-style misuse
//! inside the step pipeline is logged with `log::error!` at the failure site
//! and answered with a safe default instead.
//!
//! Author: Moroya Sakamoto

use thiserror::Error;

/// Unified error type for space operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PhysicsError {
    /// The space is stepping; structural changes must wait until it returns.
    #[error("space is locked while stepping, cannot {operation}")]
    SpaceLocked {
        /// What the caller tried to do
        operation: &'static str,
    },
    /// The object key is stale or belongs to another space.
    #[error("object does not exist in this space")]
    InvalidObject,
    /// Shape index is out of range.
    #[error("shape index {index} out of range (count={count})")]
    InvalidShapeIndex {
        /// The invalid index that was provided
        index: usize,
        /// Current number of shapes on the object
        count: usize,
    },
    /// The constraint key is stale.
    #[error("constraint does not exist in this space")]
    InvalidConstraint,
    /// The object is of the wrong kind for the operation (e.g. a joint on an area).
    #[error("wrong object kind: expected {expected}")]
    WrongObjectKind {
        /// Kind the operation needs
        expected: &'static str,
    },
    /// A transform origin lies farther away than the fixed-point range allows.
    #[error("object went too far away from the origin")]
    ObjectTooFar,
    /// Invalid configuration parameter.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the invalid configuration
        reason: &'static str,
    },
    /// The worker pool could not be created.
    #[error("thread pool creation failed: {reason}")]
    ThreadPool {
        /// Message reported by the pool builder
        reason: &'static str,
    },
}

/// Convenience alias used across the crate.
pub type PhysicsResult<T> = Result<T, PhysicsError>;
