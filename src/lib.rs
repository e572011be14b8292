//! # Livewatch
//!
//! A live query subscription engine: clients register long-lived watches
//! over a time-series store and receive a stream of incrementally computed
//! results until they unsubscribe, disconnect, or the server shuts down.
//!
//! ## Core Concepts
//!
//! - **Registry**: connection → subscriptions map; validates and owns
//!   every subscription's termination signal
//! - **Dispatcher**: starts one execution per subscription and runs its
//!   forwarding loop until a termination trigger fires
//! - **Execution engine**: collaborator that turns a query into a stream
//!   of result events, stopping promptly on cancellation
//! - **Sink**: the capability of delivering one payload to the owning
//!   connection
//!
//! ## Example
//!
//! ```ignore
//! use livewatch::{
//!     CancelToken, ChannelSink, ConnectionId, Dispatcher, PollConfig, PollEngine,
//!     Registry, SubscriptionRequest,
//! };
//! use std::sync::Arc;
//!
//! let shutdown = CancelToken::new();
//! let registry = Arc::new(Registry::new());
//! let engine = Arc::new(PollEngine::new(store, PollConfig::default()));
//! let dispatcher = Arc::new(Dispatcher::new(registry.clone(), engine, shutdown.clone()));
//! dispatcher.spawn();
//!
//! // One watch per client request; the receiver side feeds the wire.
//! let (sink, deliveries) = ChannelSink::new(16);
//! dispatcher.subscribe(
//!     ConnectionId(1),
//!     SubscriptionRequest::new("s1", "cpu"),
//!     Arc::new(sink),
//! )?;
//!
//! // On stop message or connection loss:
//! registry.unregister(ConnectionId(1), "s1");
//! // On server shutdown:
//! shutdown.cancel();
//! ```

pub mod cancel;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod registry;
pub mod sink;
pub mod types;

// Re-exports
pub use cancel::{CancelToken, DoneSignal};
pub use dispatcher::Dispatcher;
pub use engine::{
    DataPoint, ExecutionEngine, ExecutionError, PollConfig, PollEngine, ResultEvent, ResultStream,
    TimeSeriesStore,
};
pub use error::{Result, ValidationError, WatchError};
pub use registry::{Registry, Subscription};
pub use sink::{ChannelSink, DeliverySink};
pub use types::{
    ConnectionId, Delivery, DeliveryError, SubscriptionInfo, SubscriptionRequest,
    SubscriptionState, Variables,
};
