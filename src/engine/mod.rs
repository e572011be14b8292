//! Execution engine seam.
//!
//! The engine is an external collaborator: given a query, named inputs, and
//! a cancellation token, it produces a sequence of [`ResultEvent`]s over
//! time. The stream is a plain crossbeam receiver; the engine closing its
//! sender is the terminal signal. Cancelling the token must end the stream
//! promptly.
//!
//! [`PollEngine`] is the built-in engine: it periodically re-runs a
//! query-last against a [`TimeSeriesStore`] and emits one event per
//! returned data point.

mod poll;

pub use poll::{DataPoint, PollConfig, PollEngine, TimeSeriesStore};

use crate::cancel::CancelToken;
use crate::types::{Delivery, DeliveryError, Variables};
use crossbeam_channel::Receiver;
use thiserror::Error;

/// Errors produced by query execution.
///
/// Returned from `execute` they are start errors (the subscription never
/// runs); carried inside a [`ResultEvent`] they are runtime errors and the
/// subscription continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("execution failed: {0}")]
    Failed(String),
}

/// A single produced value from an execution.
#[derive(Debug, Clone)]
pub struct ResultEvent {
    /// Result data, if any.
    pub data: Option<serde_json::Value>,

    /// Errors associated with this result. Non-fatal: the stream may keep
    /// producing after an erroring event.
    pub errors: Vec<ExecutionError>,
}

impl ResultEvent {
    /// An event carrying only data.
    pub fn data(value: serde_json::Value) -> Self {
        Self {
            data: Some(value),
            errors: Vec::new(),
        }
    }

    /// An event carrying only errors.
    pub fn errors(errors: Vec<ExecutionError>) -> Self {
        Self { data: None, errors }
    }

    /// Convert to the client-facing representation: error messages only,
    /// no internal detail.
    pub fn into_delivery(self) -> Delivery {
        Delivery {
            data: self.data,
            errors: self
                .errors
                .iter()
                .map(|e| DeliveryError::new(e.to_string()))
                .collect(),
        }
    }
}

/// A stream of execution results. Disconnection means the execution has no
/// more values.
pub type ResultStream = Receiver<ResultEvent>;

/// Evaluates a query against live data and emits a sequence of results.
pub trait ExecutionEngine: Send + Sync {
    /// Begin executing `query`. Returns the result stream, or an error if
    /// execution cannot begin (the caller never sees a stream in that
    /// case). Production must stop promptly once `token` is cancelled.
    fn execute(
        &self,
        token: CancelToken,
        query: &str,
        operation_name: Option<&str>,
        variables: &Variables,
    ) -> Result<ResultStream, ExecutionError>;
}
