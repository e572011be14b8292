//! Subscription dispatcher: starts one execution per registered
//! subscription and runs its forwarding loop.
//!
//! Per-subscription state machine: `Pending` (registered) → `Running`
//! (execution started, forwarding loop active) → `Terminated` (loop
//! exited). Three triggers race to terminate a running subscription:
//! server shutdown, the subscription's done-signal, and the execution
//! finishing. The first two are merged into a single execution token, so
//! the forwarding loop only ever waits on "next result" and "cancelled".

use crate::cancel::CancelToken;
use crate::engine::{ExecutionEngine, ExecutionError, ResultStream};
use crate::error::{Result, WatchError};
use crate::registry::{Registry, Subscription};
use crate::sink::DeliverySink;
use crate::types::{ConnectionId, SubscriptionRequest};
use crossbeam_channel::{select, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Starts and supervises subscription executions.
///
/// The dispatcher consumes the registry's registration channel, so
/// subscriptions registered directly on the registry are picked up too.
/// Construct it with the server's root cancellation token; cancelling that
/// token stops the dispatch loop and every forwarding loop.
pub struct Dispatcher {
    registry: Arc<Registry>,
    engine: Arc<dyn ExecutionEngine>,
    shutdown: CancelToken,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        engine: Arc<dyn ExecutionEngine>,
        shutdown: CancelToken,
    ) -> Self {
        Self {
            registry,
            engine,
            shutdown,
        }
    }

    /// Spawn the dispatch loop.
    ///
    /// The registration channel is attached before this returns, so no
    /// registration can slip past the loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let incoming = this.registry.listen();
        thread::spawn(move || this.run(incoming))
    }

    fn run(&self, incoming: Receiver<Arc<Subscription>>) {
        loop {
            select! {
                recv(self.shutdown.done()) -> _ => {
                    tracing::debug!("dispatcher shutting down");
                    return;
                }
                recv(incoming) -> msg => {
                    let Ok(subscription) = msg else { return };
                    if !subscription.claim_start() {
                        // Already started through the front door.
                        continue;
                    }
                    if let Err(err) = self.start(&subscription) {
                        tracing::warn!(
                            owner = %subscription.owner(),
                            id = %subscription.id(),
                            error = %err,
                            "subscription failed to start",
                        );
                    }
                }
            }
        }
    }

    /// Register and start a subscription in one step.
    ///
    /// This is the transport adapter's entry point: validation, duplicate,
    /// and execution-start failures all surface here, before any data
    /// flows. On an execution-start failure the registration is rolled
    /// back, so nothing leaks and the subscription never runs.
    pub fn subscribe(
        &self,
        owner: ConnectionId,
        request: SubscriptionRequest,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<()> {
        let subscription = self.registry.register_claimed(owner, request, sink)?;
        self.start(&subscription)
    }

    /// Start the execution for a claimed subscription and hand the result
    /// stream to a fresh forwarding loop.
    fn start(&self, subscription: &Arc<Subscription>) -> Result<()> {
        if subscription.done().is_fired() {
            // Unregistered before execution began: terminate with zero
            // deliveries, never a leaked loop.
            subscription.terminate();
            return Ok(());
        }

        let token = CancelToken::linked(&[&self.shutdown, subscription.done().token()]);
        let stream = self
            .engine
            .execute(
                token.clone(),
                subscription.query(),
                subscription.operation_name(),
                subscription.variables(),
            )
            .map_err(|err| self.abort_start(subscription, &token, err))?;

        subscription.set_running();
        tracing::debug!(
            owner = %subscription.owner(),
            id = %subscription.id(),
            "subscription running",
        );

        let loop_subscription = subscription.clone();
        let loop_token = token.clone();
        let spawned = thread::Builder::new()
            .name(format!("livewatch-forward-{}", subscription.id()))
            .spawn(move || forward(loop_subscription, stream, loop_token));
        if let Err(err) = spawned {
            // The engine was already started; the cancel inside
            // abort_start stops it again.
            return Err(self.abort_start(
                subscription,
                &token,
                ExecutionError::Failed(err.to_string()),
            ));
        }
        Ok(())
    }

    fn abort_start(
        &self,
        subscription: &Arc<Subscription>,
        token: &CancelToken,
        err: ExecutionError,
    ) -> WatchError {
        token.cancel();
        subscription.terminate();
        self.registry
            .unregister(subscription.owner(), subscription.id());
        WatchError::ExecutionStart(err)
    }
}

/// Relay execution results to the subscription's sink until a termination
/// trigger fires.
fn forward(subscription: Arc<Subscription>, stream: ResultStream, token: CancelToken) {
    loop {
        select! {
            recv(token.done()) -> _ => break,
            recv(stream) -> msg => match msg {
                Ok(event) => {
                    // The delivery re-checks cancellation under the gate,
                    // so nothing is sent once an unregister has returned.
                    if !subscription.deliver(&token, event.into_delivery()) {
                        break;
                    }
                }
                // Stream disconnected: the execution has no more values.
                Err(_) => break,
            }
        }
    }

    // Stop the execution on every exit path; cancelling one that already
    // finished is a no-op. Completion does not unregister: the registry
    // stays the transport adapter's source of truth.
    token.cancel();
    subscription.terminate();
    tracing::debug!(
        owner = %subscription.owner(),
        id = %subscription.id(),
        "forwarding loop exited",
    );
}
