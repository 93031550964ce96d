//! Cross-process fan-out.
//!
//! An [`ExternalBroker`] moves serialized notification batches between every
//! process that listens on a topic, the publishing process included. Delivery is
//! at most once: a batch published while the broker is unreachable is dropped.

pub mod listeners;
pub mod memory;
pub mod net;
pub mod relay;

use std::sync::Arc;

use bytes::Bytes;

use crate::notify::Topic;

pub use listeners::ListenerRegistry;
pub use memory::{InMemoryBroker, InMemoryBus};
pub use net::RelayHub;
pub use relay::RelayBroker;

/// Invoked once per batch published on the topic it was registered for
pub type BrokerCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// One process's connection to the pub/sub bus
pub trait ExternalBroker: Send + Sync {
    /// Fire-and-forget; dropped silently when the bus is unreachable
    fn publish(&self, topic: Topic, payload: Bytes);

    /// Register this process's listener for `topic`.
    ///
    /// Returns `false` and leaves the existing listener in place when one is
    /// already registered.
    fn subscribe(&self, topic: Topic, callback: BrokerCallback) -> bool;

    fn has_listener(&self, topic: Topic) -> bool;

    /// Remove this process's listener for `topic`, if any
    fn unsubscribe(&self, topic: Topic);
}
