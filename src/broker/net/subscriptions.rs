use std::collections::HashSet;

use dashmap::DashMap;
use log::{debug, info};

use crate::broker::net::ConnectionId;

/// Raw topic name as sent on the wire
pub type TopicName = Vec<u8>;

/// Which hub connections listen on which topic
#[derive(Default)]
pub struct TopicSubscriptions {
    inner: DashMap<TopicName, HashSet<ConnectionId>>,
}

impl TopicSubscriptions {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn subscribe(&self, topic: &[u8], connection: ConnectionId) {
        debug!("Adding connection {} to topic {}", connection, String::from_utf8_lossy(topic));
        self.inner.entry(topic.to_vec()).or_default().insert(connection);
    }

    pub fn unsubscribe(&self, topic: &[u8], connection: ConnectionId) {
        debug!("Removing connection {} from topic {}", connection, String::from_utf8_lossy(topic));

        if let Some(mut entry) = self.inner.get_mut(topic) {
            entry.remove(&connection);
        }
        // re-checked under the shard lock, a concurrent subscribe may have refilled it
        if self.inner.remove_if(topic, |_, connections| connections.is_empty()).is_some() {
            debug!("Removed empty topic {}", String::from_utf8_lossy(topic));
        }
    }

    pub fn connections_for_topic(&self, topic: &[u8]) -> Vec<ConnectionId> {
        match self.inner.get(topic) {
            Some(entry) => entry.iter().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Drop a connection from every topic it listens on
    pub fn unsubscribe_all(&self, connection: ConnectionId) {
        // collect first, removal needs the shard locks iteration holds
        let topics: Vec<TopicName> = self
            .inner
            .iter()
            .filter(|entry| entry.value().contains(&connection))
            .map(|entry| entry.key().clone())
            .collect();

        for topic in &topics {
            self.unsubscribe(topic, connection);
        }

        info!("Connection {} unsubscribed from {} topic(s)", connection, topics.len());
    }

    pub fn topic_count(&self) -> usize {
        self.inner.len()
    }
}
