use log::{debug, info, warn};

use crate::broker::net::connections::ConnectionRegistry;
use crate::broker::net::subscriptions::TopicSubscriptions;
use crate::broker::net::ConnectionId;
use crate::error::{ErrorCode, RelayError};
use crate::tlv::{EventType, FieldType, TLVMessage};

/// Routes frames arriving at the hub
pub struct HubHandler {
    pub subscriptions: TopicSubscriptions,
    pub connections: ConnectionRegistry,
}

impl Default for HubHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl HubHandler {
    pub fn new() -> Self {
        Self {
            subscriptions: TopicSubscriptions::new(),
            connections: ConnectionRegistry::new(),
        }
    }

    /// Handle one frame from `source`. An error means the peer broke the
    /// protocol and the connection should be closed.
    pub fn handle_frame(&self, source: ConnectionId, msg: &TLVMessage) -> Result<(), RelayError> {
        match msg.event_type {
            EventType::Subscribe => {
                let topic = msg.require_field(FieldType::Topic)?;
                self.subscriptions.subscribe(topic, source);
                Ok(())
            },
            EventType::Unsubscribe => {
                let topic = msg.require_field(FieldType::Topic)?;
                self.subscriptions.unsubscribe(topic, source);
                Ok(())
            },
            EventType::Publish => self.handle_publish(source, msg),
            EventType::Ok => Ok(()),
            EventType::Error => {
                warn!("Connection {} reported an error: {:?}", source, msg.get_field(FieldType::ErrorText));
                Ok(())
            },
            EventType::Deliver => Err(RelayError::new(
                ErrorCode::InvalidEventType,
                "Deliver frames are only sent by the hub",
            )),
        }
    }

    /// Forward a published batch to every connection listening on its topic,
    /// the publisher included
    fn handle_publish(&self, source: ConnectionId, msg: &TLVMessage) -> Result<(), RelayError> {
        let topic = msg.require_field(FieldType::Topic)?;
        let payload = msg.require_field(FieldType::Payload)?;

        let mut deliver = TLVMessage::new(EventType::Deliver);
        deliver.insert_field(FieldType::Topic, topic.clone());
        deliver.insert_field(FieldType::Payload, payload.clone());
        if let Some(origin) = msg.get_field(FieldType::Origin) {
            deliver.insert_field(FieldType::Origin, origin.clone());
        }

        let targets = self.subscriptions.connections_for_topic(topic);
        debug!(
            "Publish from {} on topic {}: {} listener(s)",
            source,
            String::from_utf8_lossy(topic),
            targets.len()
        );
        self.connections.send_to(&targets, &deliver);
        Ok(())
    }

    pub fn handle_disconnect(&self, id: ConnectionId) {
        self.subscriptions.unsubscribe_all(id);
        self.connections.unregister(id);
        info!("Connection {} cleaned up", id);
    }
}
