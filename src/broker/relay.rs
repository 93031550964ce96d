use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerCallback, ExternalBroker, ListenerRegistry};
use crate::chatrelay::config::BrokerConfig;
use crate::error::{ErrorCode, RelayError};
use crate::notify::Topic;
use crate::tlv::{EventType, FieldType, TLVMessage};

/// [`ExternalBroker`] backed by a relay hub over TCP.
///
/// A background task keeps the connection up, re-registering every topic
/// listener after each reconnect. Publishes issued while disconnected are
/// dropped.
pub struct RelayBroker {
    node_id: String,
    listeners: ListenerRegistry,
    writer: RwLock<Option<UnboundedSender<TLVMessage>>>,
    connected: watch::Sender<bool>,
    cancel_token: CancellationToken,
}

impl RelayBroker {
    /// Start connecting to `config.endpoint` in the background. Must be called
    /// inside a tokio runtime.
    pub fn connect(config: &BrokerConfig, node_id: impl Into<String>) -> Arc<Self> {
        let (connected, _) = watch::channel(false);
        let broker = Arc::new(Self {
            node_id: node_id.into(),
            listeners: ListenerRegistry::new(),
            writer: RwLock::new(None),
            connected,
            cancel_token: CancellationToken::new(),
        });

        let endpoint = config.endpoint.clone();
        let interval = config.reconnect_interval();
        let task_broker = broker.clone();
        tokio::spawn(async move {
            task_broker.run(endpoint, interval).await;
        });

        broker
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolves once a connection to the hub is up
    pub async fn wait_connected(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|connected| *connected).await;
    }

    /// Stop the connection task for good
    pub fn close(&self) {
        info!("Closing relay broker {}", self.node_id);
        self.cancel_token.cancel();
    }

    async fn run(self: Arc<Self>, endpoint: String, interval: Duration) {
        loop {
            let attempt = tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                res = dial(&endpoint) => res,
            };

            match attempt {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY towards {}: {}", endpoint, e);
                    }
                    info!("Node {} connected to relay hub at {}", self.node_id, endpoint);

                    let result = self.session(stream).await;
                    self.detach();
                    match result {
                        Ok(()) => info!("Relay hub at {} closed the connection", endpoint),
                        Err(e) => warn!("Connection to relay hub at {} lost: {}", endpoint, e),
                    }
                },
                Err(e) => debug!("Relay hub unreachable: {}", e),
            }

            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = sleep(interval) => {},
            }
        }

        self.detach();
        info!("Relay broker {} stopped", self.node_id);
    }

    async fn session(&self, stream: TcpStream) -> Result<(), RelayError> {
        let (mut reader, writer) = stream.into_split();
        let (write_tx, write_rx) = unbounded_channel();

        // writer goes live before the topic replay so no concurrent subscribe is missed
        *self.writer.write().expect("relay writer lock poisoned") = Some(write_tx.clone());
        for topic in self.listeners.topics() {
            let _ = write_tx.send(topic_frame(EventType::Subscribe, topic));
        }
        drop(write_tx);
        self.connected.send_replace(true);

        let write_task = tokio::spawn(write_task(writer, write_rx));

        let result = loop {
            let next = tokio::select! {
                _ = self.cancel_token.cancelled() => break Ok(()),
                next = TLVMessage::read_from(&mut reader) => next,
            };
            match next {
                Ok(Some(msg)) => self.handle_frame(msg),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        write_task.abort();
        result
    }

    fn handle_frame(&self, msg: TLVMessage) {
        match msg.event_type {
            EventType::Deliver => {
                let (Some(topic), Some(payload)) = (msg.get_field(FieldType::Topic), msg.get_field(FieldType::Payload)) else {
                    warn!("Deliver frame without topic or payload");
                    return;
                };
                let Some(topic) = Topic::from_wire(topic) else {
                    warn!("Deliver frame for unknown topic {}", String::from_utf8_lossy(topic));
                    return;
                };
                let origin = msg
                    .get_field(FieldType::Origin)
                    .map(|o| String::from_utf8_lossy(o).into_owned())
                    .unwrap_or_else(|| "unknown".to_string());
                match self.listeners.get(topic) {
                    Some(callback) => {
                        debug!("Batch on topic {} published by node {}", topic, origin);
                        callback(payload.clone());
                    },
                    None => debug!("No listener for topic {}, dropping batch from node {}", topic, origin),
                }
            },
            EventType::Error => {
                let err = hub_error(&msg);
                let detail = err.code().map(|code| code.description()).unwrap_or_default();
                error!("Relay hub reported an error: {} ({})", err, detail);
            },
            other => debug!("Ignoring {:?} frame from relay hub", other),
        }
    }

    fn detach(&self) {
        self.writer.write().expect("relay writer lock poisoned").take();
        self.connected.send_replace(false);
    }

    fn send(&self, msg: TLVMessage) -> Result<(), RelayError> {
        let writer = self.writer.read().expect("relay writer lock poisoned");
        match writer.as_ref() {
            Some(tx) => tx
                .send(msg)
                .map_err(|_| RelayError::new(ErrorCode::BrokerUnreachable, "Relay connection is closing")),
            None => Err(RelayError::new(ErrorCode::BrokerUnreachable, "Not connected to relay hub")),
        }
    }
}

async fn dial(endpoint: &str) -> Result<TcpStream, RelayError> {
    TcpStream::connect(endpoint).await.map_err(|e| {
        RelayError::new(ErrorCode::ConnectionFailed, format!("Failed to connect to {}: {}", endpoint, e))
    })
}

/// Rebuild the error carried by a hub `Error` frame
fn hub_error(msg: &TLVMessage) -> RelayError {
    let code = msg
        .get_field(FieldType::ErrorCode)
        .filter(|raw| raw.len() == 2)
        .and_then(|raw| ErrorCode::from_u16(u16::from_be_bytes([raw[0], raw[1]])))
        .unwrap_or(ErrorCode::InternalServerError);
    let text = msg
        .get_field(FieldType::ErrorText)
        .map(|t| String::from_utf8_lossy(t).into_owned())
        .unwrap_or_default();
    RelayError::new(code, text)
}

fn topic_frame(event_type: EventType, topic: Topic) -> TLVMessage {
    let mut msg = TLVMessage::new(event_type);
    msg.insert_field(FieldType::Topic, topic.as_str());
    msg
}

async fn write_task(mut writer: OwnedWriteHalf, mut rx: UnboundedReceiver<TLVMessage>) {
    while let Some(msg) = rx.recv().await {
        let encoded = match msg.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Dropping unencodable {:?} frame: {}", msg.event_type, e);
                continue;
            },
        };
        if let Err(e) = writer.write_all(&encoded).await {
            warn!("Failed to write to relay hub: {}", e);
            return;
        }
    }
}

impl ExternalBroker for RelayBroker {
    fn publish(&self, topic: Topic, payload: Bytes) {
        let mut msg = topic_frame(EventType::Publish, topic);
        msg.insert_field(FieldType::Payload, payload);
        msg.insert_field(FieldType::Origin, self.node_id.clone());

        if let Err(e) = self.send(msg) {
            debug!("Dropping batch for topic {}: {}", topic, e);
        }
    }

    fn subscribe(&self, topic: Topic, callback: BrokerCallback) -> bool {
        if !self.listeners.register(topic, callback) {
            return false;
        }
        // while disconnected the next session replays it
        if let Err(e) = self.send(topic_frame(EventType::Subscribe, topic)) {
            debug!("Deferring subscribe for topic {}: {}", topic, e);
        }
        true
    }

    fn has_listener(&self, topic: Topic) -> bool {
        self.listeners.contains(topic)
    }

    fn unsubscribe(&self, topic: Topic) {
        if !self.listeners.unregister(topic) {
            return;
        }
        // while disconnected the next session simply does not replay it
        if let Err(e) = self.send(topic_frame(EventType::Unsubscribe, topic)) {
            debug!("Skipping unsubscribe for topic {}: {}", topic, e);
        }
    }
}
