use std::sync::Arc;
use std::time::Duration;

use chatrelay::broker::{RelayBroker, RelayHub};
use chatrelay::broker::net::handler::HubHandler;
use chatrelay::chatrelay::config::{BrokerConfig, ServerConfig};
use chatrelay::chatrelay::notifiers::Notifiers;
use chatrelay::chatrelay::updates::{AccountUpdate, ChatUpdate, Message, MessageUpdate};
use chatrelay::chatrelay::Node;
use chatrelay::error::ErrorCode;
use chatrelay::notify::ClientData;
use chatrelay::tlv::{EventType, FieldType, TLVMessage};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

async fn start_hub() -> (String, Arc<HubHandler>, CancellationToken) {
    let hub = RelayHub::bind("127.0.0.1:0").await.unwrap();
    let addr = hub.local_addr().unwrap().to_string();
    let handler = hub.handler();
    let token = hub.shutdown_token();
    tokio::spawn(hub.run());
    (addr, handler, token)
}

fn config(endpoint: &str) -> BrokerConfig {
    BrokerConfig {
        endpoint: endpoint.to_string(),
        reconnect_interval_ms: 50,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn message(text: &str) -> Message {
    Message {
        id: 1,
        chat_id: 10,
        sender_id: 1,
        text: text.to_string(),
        sent_at_ms: 0,
    }
}

#[tokio::test]
async fn publish_on_one_node_reaches_subscriber_on_another() {
    let (addr, handler, token) = start_hub().await;

    let broker_a = RelayBroker::connect(&config(&addr), "node-a");
    let broker_b = RelayBroker::connect(&config(&addr), "node-b");
    let node_a = Notifiers::new(broker_a.clone());
    let node_b = Notifiers::new(broker_b.clone());
    node_a.bootstrap();
    node_b.bootstrap();

    timeout(WAIT, broker_a.wait_connected()).await.unwrap();
    timeout(WAIT, broker_b.wait_connected()).await.unwrap();
    wait_until(|| handler.subscriptions.connections_for_topic(b"messages").len() == 2).await;

    let (mut on_b, _) = node_b.subscribe_to_messages(2);
    let (mut not_addressed, _) = node_b.subscribe_to_messages(3);
    assert_eq!(on_b.recv().await, Some(MessageUpdate::CreatedSubscription));
    assert_eq!(not_addressed.recv().await, Some(MessageUpdate::CreatedSubscription));

    node_a
        .messages
        .publish(MessageUpdate::NewMessage(message("over the wire")), [ClientData::ByUser(2)]);

    let received = timeout(WAIT, on_b.recv()).await.unwrap();
    assert_eq!(received, Some(MessageUpdate::NewMessage(message("over the wire"))));

    // a later batch for user 3 arriving proves nothing else was queued before it
    node_a
        .messages
        .publish(MessageUpdate::NewMessage(message("second")), [ClientData::ByUser(3)]);
    let received = timeout(WAIT, not_addressed.recv()).await.unwrap();
    assert_eq!(received, Some(MessageUpdate::NewMessage(message("second"))));
    assert_eq!(on_b.try_recv(), None);

    broker_a.close();
    broker_b.close();
    token.cancel();
}

#[tokio::test]
async fn publisher_receives_its_own_batch() {
    let (addr, handler, token) = start_hub().await;
    let broker = RelayBroker::connect(&config(&addr), "solo");
    let notifiers = Notifiers::new(broker.clone());
    notifiers.bootstrap();

    timeout(WAIT, broker.wait_connected()).await.unwrap();
    wait_until(|| !handler.subscriptions.connections_for_topic(b"chat_messages").is_empty()).await;

    let (mut viewer, _) = notifiers.subscribe_to_chat_messages(10);
    assert_eq!(viewer.recv().await, Some(MessageUpdate::CreatedSubscription));

    notifiers
        .chat_messages
        .publish(MessageUpdate::DeletionOfEveryMessage { chat_id: 10 }, [ClientData::ByChat(10)]);

    let received = timeout(WAIT, viewer.recv()).await.unwrap();
    assert_eq!(received, Some(MessageUpdate::DeletionOfEveryMessage { chat_id: 10 }));

    broker.close();
    token.cancel();
}

#[tokio::test]
async fn unreachable_hub_drops_publishes_silently() {
    // grab a free port and release it so nothing listens there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let broker = RelayBroker::connect(&config(&addr), "lonely");
    let notifiers = Notifiers::new(broker.clone());
    notifiers.bootstrap();

    let (mut stream, _) = notifiers.subscribe_to_messages(1);
    assert_eq!(stream.try_recv(), Some(MessageUpdate::CreatedSubscription));

    notifiers
        .messages
        .publish(MessageUpdate::NewMessage(message("nowhere")), [ClientData::ByUser(1)]);
    sleep(Duration::from_millis(100)).await;

    assert!(!broker.is_connected());
    assert_eq!(stream.try_recv(), None);
    broker.close();
}

#[tokio::test]
async fn hub_drops_connection_state_on_disconnect() {
    let (addr, handler, token) = start_hub().await;
    let broker = RelayBroker::connect(&config(&addr), "short-lived");
    let notifiers = Notifiers::new(broker.clone());
    notifiers.bootstrap();

    timeout(WAIT, broker.wait_connected()).await.unwrap();
    wait_until(|| handler.subscriptions.topic_count() == 10).await;

    broker.close();
    wait_until(|| handler.connections.is_empty()).await;
    assert_eq!(handler.subscriptions.topic_count(), 0);
    token.cancel();
}

#[tokio::test]
async fn malformed_frame_gets_an_error_and_a_closed_connection() {
    let (addr, handler, token) = start_hub().await;
    let mut raw = TcpStream::connect(&addr).await.unwrap();

    let publish_without_payload = {
        let mut msg = TLVMessage::new(EventType::Publish);
        msg.insert_field(FieldType::Topic, "messages");
        msg.encode().unwrap()
    };
    raw.write_all(&publish_without_payload).await.unwrap();

    let reply = timeout(WAIT, TLVMessage::read_from(&mut raw)).await.unwrap().unwrap();
    let reply = reply.expect("expected an error frame");
    assert_eq!(reply.event_type, EventType::Error);
    let code = reply.get_field(FieldType::ErrorCode).unwrap();
    assert_eq!(ErrorCode::from_u16(u16::from_be_bytes([code[0], code[1]])), Some(ErrorCode::MissingField));
    assert!(!reply.get_field(FieldType::ErrorText).unwrap().is_empty());

    let after = timeout(WAIT, TLVMessage::read_from(&mut raw)).await.unwrap().unwrap();
    assert!(after.is_none());
    wait_until(|| handler.connections.is_empty()).await;
    token.cancel();
}

#[tokio::test]
async fn node_starts_against_a_hub_and_shuts_down_cleanly() {
    let (addr, handler, token) = start_hub().await;
    let config = ServerConfig {
        id: "api-1".into(),
        broker: config(&addr),
        hub: None,
    };

    let node = Node::start(&config).await.unwrap();
    timeout(WAIT, node.broker.wait_connected()).await.unwrap();
    wait_until(|| handler.subscriptions.topic_count() == 10).await;

    let (mut stream, _) = node.notifiers.subscribe_to_accounts(5);
    assert_eq!(stream.try_recv(), Some(AccountUpdate::CreatedSubscription));

    node.shutdown().await;
    assert_eq!(timeout(WAIT, stream.recv()).await.unwrap(), None);
    wait_until(|| handler.connections.is_empty()).await;
    token.cancel();
}

#[tokio::test]
async fn dropped_notifiers_release_their_topics_at_the_hub() {
    let (addr, handler, token) = start_hub().await;
    let broker = RelayBroker::connect(&config(&addr), "rebuilt");
    let first = Notifiers::new(broker.clone());
    first.bootstrap();
    timeout(WAIT, broker.wait_connected()).await.unwrap();
    wait_until(|| handler.subscriptions.topic_count() == 10).await;

    drop(first);
    wait_until(|| handler.subscriptions.topic_count() == 0).await;

    let second = Notifiers::new(broker.clone());
    assert_eq!(second.bootstrap(), 10);
    wait_until(|| handler.subscriptions.topic_count() == 10).await;

    let (mut stream, _) = second.subscribe_to_chats(4);
    assert_eq!(stream.try_recv(), Some(ChatUpdate::CreatedSubscription));
    second
        .chats
        .publish(ChatUpdate::GroupChatId { chat_id: 12 }, [ClientData::ByUser(4)]);
    let received = timeout(WAIT, stream.recv()).await.unwrap();
    assert_eq!(received, Some(ChatUpdate::GroupChatId { chat_id: 12 }));

    broker.close();
    token.cancel();
}
