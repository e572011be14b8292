//! Error types for the live query engine.

use crate::engine::ExecutionError;
use crate::types::ConnectionId;
use thiserror::Error;

/// Why a subscription request failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("subscription id must not be empty")]
    EmptyId,

    #[error("query must not be empty")]
    EmptyQuery,
}

/// Main error type for watch operations.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The subscription request was malformed; never inserted, never started.
    #[error("invalid subscription: {0:?}")]
    Invalid(Vec<ValidationError>),

    /// The owning connection already has a subscription with this id.
    #[error("duplicate subscription {id:?} for connection {owner}")]
    DuplicateSubscription { owner: ConnectionId, id: String },

    /// The execution engine could not begin executing the query.
    #[error("execution failed to start: {0}")]
    ExecutionStart(#[from] ExecutionError),

    /// The subscription's sink no longer accepts deliveries.
    #[error("delivery sink closed")]
    SinkClosed,
}

/// Result type for watch operations.
pub type Result<T> = std::result::Result<T, WatchError>;
