//! Lock-free message passing between shards and ambient services.
//!
//! No component in the CORE holds another's lock (`spec.md` §2); cross-shard
//! traffic goes through bounded or unbounded `crossbeam` channels instead.

#![forbid(unsafe_code)]

use crossbeam::channel;
use thiserror::Error;

/// Marker trait for anything sent through the bus.
pub trait Message: Send + 'static {}

/// Errors raised by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// All receivers were dropped.
    #[error("bus channel disconnected")]
    Disconnected,
    /// A bounded channel's queue was full.
    #[error("bus channel full")]
    Full,
}

impl<T> From<channel::SendError<T>> for BusError {
    fn from(_: channel::SendError<T>) -> Self {
        Self::Disconnected
    }
}

impl<T> From<channel::TrySendError<T>> for BusError {
    fn from(e: channel::TrySendError<T>) -> Self {
        match e {
            channel::TrySendError::Full(_) => Self::Full,
            channel::TrySendError::Disconnected(_) => Self::Disconnected,
        }
    }
}

impl From<channel::RecvError> for BusError {
    fn from(_: channel::RecvError) -> Self {
        Self::Disconnected
    }
}

/// Multi-producer multi-consumer bus over a cloneable message type.
pub struct Bus<T: Message + Clone> {
    tx: channel::Sender<T>,
    rx: channel::Receiver<T>,
}

impl<T: Message + Clone> Bus<T> {
    /// Bounded bus; `publish` fails fast instead of blocking once full.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self { tx, rx }
    }

    /// Unbounded bus.
    #[must_use]
    pub fn unbounded() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Get a publisher handle.
    #[must_use]
    pub fn publisher(&self) -> Publisher<T> {
        Publisher { tx: self.tx.clone() }
    }

    /// Get a subscriber handle.
    #[must_use]
    pub fn subscriber(&self) -> Subscriber<T> {
        Subscriber { rx: self.rx.clone() }
    }
}

/// Publish-only handle onto a [`Bus`].
#[derive(Clone)]
pub struct Publisher<T> {
    tx: channel::Sender<T>,
}

impl<T: Message> Publisher<T> {
    /// Publish, blocking if the underlying channel is bounded and full.
    pub fn publish(&self, msg: T) -> Result<(), BusError> {
        Ok(self.tx.send(msg)?)
    }

    /// Publish without blocking; returns [`BusError::Full`] instead of
    /// waiting. This is what the journal's writer front-end uses to honor
    /// the "never block the submitter" rule in `spec.md` §5.
    pub fn try_publish(&self, msg: T) -> Result<(), BusError> {
        Ok(self.tx.try_send(msg)?)
    }
}

/// Subscribe-only handle onto a [`Bus`].
#[derive(Clone)]
pub struct Subscriber<T> {
    rx: channel::Receiver<T>,
}

impl<T: Message> Subscriber<T> {
    /// Block until a message is available.
    pub fn recv(&self) -> Result<T, BusError> {
        Ok(self.rx.recv()?)
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// One-shot single-producer single-consumer channel pair, used for per-shard
/// inboxes in the `engine` crate.
pub struct Spsc;

impl Spsc {
    /// Bounded SPSC channel.
    pub fn bounded<T: Send + 'static>(capacity: usize) -> (channel::Sender<T>, channel::Receiver<T>) {
        channel::bounded(capacity)
    }

    /// Unbounded SPSC channel.
    pub fn unbounded<T: Send + 'static>() -> (channel::Sender<T>, channel::Receiver<T>) {
        channel::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct TestMsg(u64);
    impl Message for TestMsg {}

    #[test]
    fn pubsub_roundtrip() {
        let bus = Bus::<TestMsg>::bounded(4);
        let publisher = bus.publisher();
        let subscriber = bus.subscriber();

        publisher.publish(TestMsg(7)).unwrap();
        assert_eq!(subscriber.recv().unwrap(), TestMsg(7));
    }

    #[test]
    fn bounded_bus_fails_fast_when_full() {
        let bus = Bus::<TestMsg>::bounded(1);
        let publisher = bus.publisher();
        publisher.try_publish(TestMsg(1)).unwrap();
        assert!(matches!(publisher.try_publish(TestMsg(2)), Err(BusError::Full)));
    }

    #[test]
    fn multiple_subscribers_each_get_a_copy_via_separate_receivers() {
        let bus = Bus::<TestMsg>::unbounded();
        let publisher = bus.publisher();
        let sub_a = bus.subscriber();
        let sub_b = bus.subscriber();
        publisher.publish(TestMsg(5)).unwrap();
        // crossbeam's channel is MPMC, not broadcast: only one receiver gets
        // the message. Confirm that invariant rather than assume fan-out.
        let got_a = sub_a.try_recv();
        let got_b = sub_b.try_recv();
        assert_eq!(got_a.into_iter().chain(got_b).count(), 1);
    }
}
