//! Core types for the live query engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of a client connection.
///
/// Opaque to the engine: two connections are the same connection only if
/// their ids are equal. The transport adapter is responsible for assigning
/// a unique id per connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named input values for a query, passed through to the execution engine.
pub type Variables = HashMap<String, serde_json::Value>;

/// One client's request to watch a query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Client-chosen id, unique within the owning connection.
    pub id: String,

    /// The query to execute.
    pub query: String,

    /// Optional operation name within the query document.
    pub operation_name: Option<String>,

    /// Named inputs for the execution engine.
    #[serde(default)]
    pub variables: Variables,
}

impl SubscriptionRequest {
    /// Create a request with no operation name or variables.
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            operation_name: None,
            variables: Variables::new(),
        }
    }

    /// Set the operation name.
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set the variables.
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }
}

/// Lifecycle state of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Registered, execution not yet started.
    Pending,
    /// Execution started, forwarding loop active.
    Running,
    /// Execution cancelled or finished, forwarding loop exited.
    Terminated,
}

/// A stable, client-facing error: message only, no internal detail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryError {
    pub message: String,
}

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One payload delivered to a subscription's sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Delivery {
    /// Result data, if any.
    pub data: Option<serde_json::Value>,

    /// Errors associated with this result.
    #[serde(default)]
    pub errors: Vec<DeliveryError>,
}

impl Delivery {
    /// A delivery carrying only data.
    pub fn data(value: serde_json::Value) -> Self {
        Self {
            data: Some(value),
            errors: Vec::new(),
        }
    }

    /// A delivery carrying only errors.
    pub fn errors(errors: Vec<DeliveryError>) -> Self {
        Self { data: None, errors }
    }
}

/// Read-only view of one subscription, as returned by `Registry::snapshot`.
#[derive(Clone, Debug, Serialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub query: String,
    pub operation_name: Option<String>,
    pub state: SubscriptionState,
}
