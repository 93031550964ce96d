use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};

use crate::broker::net::ConnectionId;
use crate::error::RelayError;
use crate::tlv::TLVMessage;

/// Anything the hub can push frames to
pub trait FrameSender: Send + Sync {
    fn send(&self, msg: &TLVMessage) -> Result<(), RelayError>;
}

/// All connections currently attached to the hub
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<dyn FrameSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, id: ConnectionId, sender: Arc<dyn FrameSender>) {
        info!("Registering connection {}", id);
        self.connections.insert(id, sender);
    }

    pub fn unregister(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            info!("Unregistering connection {}", id);
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Send to each listed connection; a failing connection does not stop the
    /// rest. Returns how many sends succeeded.
    pub fn send_to(&self, ids: &[ConnectionId], msg: &TLVMessage) -> usize {
        let mut sent_count = 0;
        for id in ids {
            // clone out so the send runs without the shard lock
            let sender = self.connections.get(id).map(|entry| entry.value().clone());
            match sender {
                Some(sender) => match sender.send(msg) {
                    Ok(()) => sent_count += 1,
                    Err(e) => warn!("Failed to send to connection {}: {}", id, e),
                },
                None => debug!("Connection not found: {}", id),
            }
        }
        debug!("Message sent to {}/{} connections", sent_count, ids.len());
        sent_count
    }
}
