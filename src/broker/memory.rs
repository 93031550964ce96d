use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, info};
use uuid::Uuid;

use crate::broker::{BrokerCallback, ExternalBroker, ListenerRegistry};
use crate::notify::Topic;

/// In-process stand-in for the external bus.
///
/// Every [`InMemoryBroker`] obtained from [`InMemoryBus::connect`] behaves like
/// a separate process attached to the same bus. Delivery happens synchronously
/// on the publishing thread.
#[derive(Default)]
pub struct InMemoryBus {
    connections: DashMap<Uuid, Weak<InMemoryBroker>>,
    published: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new process to the bus
    pub fn connect(self: &Arc<Self>) -> Arc<InMemoryBroker> {
        let broker = Arc::new(InMemoryBroker {
            id: Uuid::new_v4(),
            bus: Arc::clone(self),
            listeners: ListenerRegistry::new(),
            connected: AtomicBool::new(true),
        });
        self.connections.insert(broker.id, Arc::downgrade(&broker));
        info!("Process {} attached to in-memory bus", broker.id);
        broker
    }

    /// Number of batches that reached the bus
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn fan_out(&self, topic: Topic, payload: Bytes) {
        self.published.fetch_add(1, Ordering::Relaxed);

        // collect first so listeners run without holding map shards
        let mut targets = Vec::new();
        self.connections.retain(|_, weak| match weak.upgrade() {
            Some(broker) => {
                targets.push(broker);
                true
            },
            None => false,
        });

        for broker in targets {
            broker.deliver(topic, payload.clone());
        }
    }
}

/// One process's connection to an [`InMemoryBus`]
pub struct InMemoryBroker {
    id: Uuid,
    bus: Arc<InMemoryBus>,
    listeners: ListenerRegistry,
    connected: AtomicBool,
}

impl InMemoryBroker {
    /// A broker on a private bus, for single-process deployments
    pub fn standalone() -> Arc<Self> {
        InMemoryBus::new().connect()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Simulate losing the bus: publishes are dropped and nothing is received
    pub fn disconnect(&self) {
        info!("Process {} detached from in-memory bus", self.id);
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        info!("Process {} re-attached to in-memory bus", self.id);
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn deliver(&self, topic: Topic, payload: Bytes) {
        if !self.is_connected() {
            return;
        }
        match self.listeners.get(topic) {
            Some(callback) => callback(payload),
            None => debug!("Process {} has no listener for topic {}", self.id, topic),
        }
    }
}

impl ExternalBroker for InMemoryBroker {
    fn publish(&self, topic: Topic, payload: Bytes) {
        if !self.is_connected() {
            debug!("Bus unreachable, dropping batch for topic {}", topic);
            return;
        }
        self.bus.fan_out(topic, payload);
    }

    fn subscribe(&self, topic: Topic, callback: BrokerCallback) -> bool {
        self.listeners.register(topic, callback)
    }

    fn has_listener(&self, topic: Topic) -> bool {
        self.listeners.contains(topic)
    }

    fn unsubscribe(&self, topic: Topic) {
        self.listeners.unregister(topic);
    }
}

impl Drop for InMemoryBroker {
    fn drop(&mut self) {
        self.bus.connections.remove(&self.id);
    }
}
