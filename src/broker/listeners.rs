use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};

use crate::broker::BrokerCallback;
use crate::notify::Topic;

/// Per-process topic listeners, at most one per topic
#[derive(Default)]
pub struct ListenerRegistry {
    inner: DashMap<Topic, BrokerCallback>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Returns `false` if a listener for `topic` already exists
    pub fn register(&self, topic: Topic, callback: BrokerCallback) -> bool {
        match self.inner.entry(topic) {
            Entry::Occupied(_) => {
                debug!("Listener for topic {} already registered", topic);
                false
            },
            Entry::Vacant(entry) => {
                entry.insert(callback);
                info!("Registered listener for topic {}", topic);
                true
            },
        }
    }

    pub fn unregister(&self, topic: Topic) -> bool {
        let removed = self.inner.remove(&topic).is_some();
        if removed {
            info!("Unregistered listener for topic {}", topic);
        }
        removed
    }

    pub fn contains(&self, topic: Topic) -> bool {
        self.inner.contains_key(&topic)
    }

    /// Clone of the listener, so it can be called without holding the map
    pub fn get(&self, topic: Topic) -> Option<BrokerCallback> {
        self.inner.get(&topic).map(|entry| entry.value().clone())
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.inner.iter().map(|entry| *entry.key()).collect()
    }
}
