//! One-shot cancellation primitives.
//!
//! A [`CancelToken`] can be observed two ways: polled via `is_cancelled`, or
//! waited on via `done()`, a crossbeam receiver that disconnects when the
//! token is cancelled (so it composes with `select!`). Tokens form a tree:
//! cancelling a token cancels every token linked under it, which lets the
//! forwarding loop wait on a single token that merges server shutdown and
//! the per-subscription done-signal.
//!
//! [`DoneSignal`] is the exactly-once termination signal owned by a
//! registry entry: `fire()` reports whether this call was the one that
//! fired it, and firing it twice is a no-op.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

struct TokenInner {
    cancelled: AtomicBool,
    /// Held until cancellation; dropping it disconnects `rx`.
    trigger: Mutex<Option<Sender<()>>>,
    /// Disconnects when this token is cancelled.
    rx: Receiver<()>,
    /// Tokens cancelled together with this one. Held weakly so a finished
    /// subscription's token does not outlive its forwarding loop.
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        // Dropping the sender disconnects every cloned receiver.
        self.trigger.lock().take();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
        true
    }
}

/// A one-shot, composable cancellation signal.
///
/// Cancelling an already-cancelled token is a no-op, as is cancelling a
/// token whose execution has already finished.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Create a root token.
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
                rx,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a token cancelled when `self` is cancelled.
    pub fn child(&self) -> CancelToken {
        let token = CancelToken::new();
        self.attach(&token);
        token
    }

    /// Create a token cancelled when any of `parents` is cancelled.
    pub fn linked(parents: &[&CancelToken]) -> CancelToken {
        let token = CancelToken::new();
        for parent in parents {
            parent.attach(&token);
        }
        token
    }

    fn attach(&self, child: &CancelToken) {
        let mut children = self.inner.children.lock();
        if self.inner.cancelled.load(Ordering::SeqCst) {
            drop(children);
            child.cancel();
            return;
        }
        // Prune entries whose subscriptions are long gone.
        children.retain(|weak| {
            weak.upgrade()
                .map_or(false, |t| !t.cancelled.load(Ordering::SeqCst))
        });
        children.push(Arc::downgrade(&child.inner));
    }

    /// Cancel this token and everything linked under it.
    ///
    /// Returns true if this call performed the cancellation, false if the
    /// token was already cancelled.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that disconnects on cancellation, for use in `select!`.
    ///
    /// No value is ever sent on it: a `recv` completes (with a disconnect
    /// error) exactly when the token is cancelled.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.rx
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Exactly-once termination signal for one subscription.
///
/// Owned by the registry entry until removal; the dispatcher links the
/// subscription's execution token to it so firing the signal cancels the
/// execution.
#[derive(Clone, Debug)]
pub struct DoneSignal {
    token: CancelToken,
}

impl DoneSignal {
    pub fn new() -> Self {
        Self {
            token: CancelToken::new(),
        }
    }

    /// Fire the signal. Returns true only for the call that fired it;
    /// every later call is an absorbed no-op.
    pub fn fire(&self) -> bool {
        self.token.cancel()
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The signal viewed as a cancellation source, for linking.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Default for DoneSignal {
    fn default() -> Self {
        Self::new()
    }
}
