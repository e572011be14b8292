//! Delivery sinks: the capability of sending one payload to a connection.

use crate::error::{Result, WatchError};
use crate::types::Delivery;
use crossbeam_channel::{bounded, Receiver, Sender};

/// Delivers result payloads to the owning connection.
///
/// `deliver` returns once the delivery has been accepted, so the forwarding
/// loop never reads the next result before the previous one is taken: one
/// outstanding delivery is the only back-pressure protocol. Returning an
/// error means the connection is gone and the subscription should end.
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, delivery: Delivery) -> Result<()>;
}

/// A sink backed by a bounded crossbeam channel.
///
/// The receiver side is the transport adapter's outbound queue: it pulls
/// deliveries and frames them onto the wire. `deliver` blocks while the
/// channel is full and fails once the receiver is dropped.
pub struct ChannelSink {
    tx: Sender<Delivery>,
}

impl ChannelSink {
    /// Create a sink and its receiving end with the given capacity.
    pub fn new(capacity: usize) -> (Self, Receiver<Delivery>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl DeliverySink for ChannelSink {
    fn deliver(&self, delivery: Delivery) -> Result<()> {
        self.tx.send(delivery).map_err(|_| WatchError::SinkClosed)
    }
}
