use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::broker::{BrokerCallback, ExternalBroker};
use crate::error::{ErrorCode, NotifyError, RelayError};
use crate::notify::registry::SubscriptionRegistry;
use crate::notify::stream::SubscriptionStream;
use crate::notify::types::{Notification, SubscriptionId, Topic};

/// Per-topic broker between collaborators that publish updates and the
/// clients subscribed in this process.
///
/// `publish` goes through the external broker so every process sees the
/// batch; `notify` is the broker's way back in and delivers locally.
///
/// The notifier whose `listen` registered the topic listener owns it and
/// removes it on `shutdown` or drop.
pub struct Notifier<T, D> {
    topic: Topic,
    broker: Arc<dyn ExternalBroker>,
    registry: Arc<SubscriptionRegistry<T, D>>,
    owns_listener: AtomicBool,
}

impl<T, D> Notifier<T, D>
where
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
    D: Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(topic: Topic, broker: Arc<dyn ExternalBroker>) -> Self {
        Self {
            topic,
            broker,
            registry: Arc::new(SubscriptionRegistry::new()),
            owns_listener: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Live subscriptions in this process
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Open a subscription for `key`. Never fails.
    ///
    /// Dropping the returned stream removes the subscription.
    pub fn subscribe(&self, key: D) -> (SubscriptionStream<T>, SubscriptionId) {
        let (id, rx) = self.registry.insert(key);
        let registry = Arc::downgrade(&self.registry);
        let stream = SubscriptionStream::new(
            id,
            rx,
            Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(id);
                }
            }),
        );
        debug!("[{}] subscription {} opened", self.topic, id);
        (stream, id)
    }

    /// End every subscription matching `predicate`. Returns how many this
    /// call ended.
    ///
    /// Matching ids are snapshotted first, then each is removed through the
    /// same idempotent removal the stream's drop hook uses.
    pub fn unsubscribe<F>(&self, predicate: F) -> usize
    where
        F: Fn(&D, SubscriptionId) -> bool,
    {
        let matched = self.registry.matching(predicate);
        let removed = matched.into_iter().filter(|id| self.registry.remove(*id)).count();
        if removed > 0 {
            info!("[{}] unsubscribed {} subscription(s)", self.topic, removed);
        }
        removed
    }

    /// Send `update` to every subscriber of any of `keys`, in every process.
    ///
    /// Fire-and-forget: nothing is reported if the broker drops the batch.
    pub fn publish<I>(&self, update: T, keys: I)
    where
        I: IntoIterator<Item = D>,
    {
        let batch: Vec<Notification<T, D>> = keys
            .into_iter()
            .map(|key| Notification::new(update.clone(), key))
            .collect();

        if batch.is_empty() {
            debug!("[{}] no recipients, nothing to publish", self.topic);
            return;
        }

        match serde_json::to_vec(&batch) {
            Ok(payload) => {
                debug!("[{}] publishing batch of {} notification(s)", self.topic, batch.len());
                self.broker.publish(self.topic, Bytes::from(payload));
            },
            Err(e) => error!("[{}] failed to serialize batch: {}", self.topic, e),
        }
    }

    /// Deliver a batch to the matching local subscriptions.
    ///
    /// Only the broker listener should call this; everything else goes
    /// through `publish`.
    pub fn notify(&self, batch: &[Notification<T, D>]) {
        let delivered = self.registry.deliver(batch);
        debug!(
            "[{}] delivered {} update(s) from batch of {}",
            self.topic,
            delivered,
            batch.len()
        );
    }

    /// Decode a broker payload and `notify` it. Undecodable payloads are dropped.
    pub fn notify_payload(&self, payload: &[u8]) {
        match decode_batch::<T, D>(payload) {
            Ok(batch) => self.notify(&batch),
            Err(e) => warn!("[{}] dropping batch: {}", self.topic, e),
        }
    }

    /// Deliver straight to a subscription of this process, skipping the broker.
    ///
    /// Fails when `id` is unknown here or already removed; the caller should
    /// then fall back to `publish`.
    pub fn notify_subscriber(&self, update: T, id: SubscriptionId) -> Result<(), NotifyError> {
        self.registry.deliver_to(id, update)
    }

    /// `notify_subscriber`, falling back to publishing on `key` when the
    /// subscription is not (or no longer) in this process
    pub fn notify_subscriber_or_publish(&self, update: T, id: SubscriptionId, key: D) {
        if let Err(e) = self.notify_subscriber(update.clone(), id) {
            debug!("[{}] {}, publishing instead", self.topic, e);
            self.publish(update, [key]);
        }
    }

    /// Register this notifier as the process's broker listener for its topic.
    ///
    /// Returns `false` if a listener already existed, in which case nothing
    /// changes.
    pub fn listen(self: &Arc<Self>) -> bool {
        if self.broker.has_listener(self.topic) {
            debug!("[{}] listener already registered", self.topic);
            return false;
        }

        let notifier: Weak<Self> = Arc::downgrade(self);
        let callback: BrokerCallback = Arc::new(move |payload: Bytes| {
            if let Some(notifier) = notifier.upgrade() {
                notifier.notify_payload(&payload);
            }
        });
        let registered = self.broker.subscribe(self.topic, callback);
        if registered {
            self.owns_listener.store(true, Ordering::SeqCst);
        }
        registered
    }

    /// End all local subscriptions and detach from the broker
    pub fn shutdown(&self) {
        let ended = self.unsubscribe(|_, _| true);
        self.release_listener();
        info!("[{}] shut down, {} subscription(s) ended", self.topic, ended);
    }
}

fn decode_batch<T, D>(payload: &[u8]) -> Result<Vec<Notification<T, D>>, RelayError>
where
    T: DeserializeOwned,
    D: DeserializeOwned,
{
    serde_json::from_slice(payload)
        .map_err(|e| RelayError::new(ErrorCode::UndecodableBatch, format!("Failed to decode batch: {}", e)))
}

impl<T, D> Notifier<T, D> {
    /// Remove the topic listener if this notifier registered it
    fn release_listener(&self) {
        if self.owns_listener.swap(false, Ordering::SeqCst) {
            self.broker.unsubscribe(self.topic);
            debug!("[{}] listener released", self.topic);
        }
    }
}

impl<T, D> Drop for Notifier<T, D> {
    fn drop(&mut self) {
        self.release_listener();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::notify::types::ClientData;

    fn notifier() -> Arc<Notifier<String, ClientData>> {
        let notifier = Arc::new(Notifier::new(Topic::Messages, InMemoryBroker::standalone()));
        notifier.listen();
        notifier
    }

    fn n(update: &str, key: ClientData) -> Notification<String, ClientData> {
        Notification::new(update.to_string(), key)
    }

    #[test]
    fn notify_delivers_matching_updates_in_batch_order() {
        let notifier = notifier();
        let (mut stream, _) = notifier.subscribe(ClientData::ByUser(1));

        notifier.notify(&[
            n("a", ClientData::ByUser(1)),
            n("b", ClientData::ByUser(2)),
            n("c", ClientData::ByUser(1)),
            n("d", ClientData::ByChat(1)),
            n("e", ClientData::ByUser(1)),
        ]);

        assert_eq!(stream.try_recv().as_deref(), Some("a"));
        assert_eq!(stream.try_recv().as_deref(), Some("c"));
        assert_eq!(stream.try_recv().as_deref(), Some("e"));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn non_matching_subscription_gets_nothing() {
        let notifier = notifier();
        let (mut stream, _) = notifier.subscribe(ClientData::ByChat(5));
        notifier.notify(&[n("Y", ClientData::ByChat(6)), n("Y", ClientData::ByUser(5))]);
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn dropping_the_stream_removes_the_subscription() {
        let notifier = notifier();
        let (stream, id) = notifier.subscribe(ClientData::ByUser(1));
        assert_eq!(notifier.subscriber_count(), 1);

        drop(stream);
        assert_eq!(notifier.subscriber_count(), 0);
        assert_eq!(
            notifier.notify_subscriber("x".into(), id),
            Err(NotifyError::UnknownSubscription(id))
        );
    }

    #[test]
    fn closing_then_unsubscribing_is_harmless() {
        let notifier = notifier();
        let (mut stream, id) = notifier.subscribe(ClientData::ByUser(1));
        let (_other, _) = notifier.subscribe(ClientData::ByUser(2));

        stream.close();
        assert_eq!(notifier.unsubscribe(|_, sid| sid == id), 0);
        drop(stream);
        assert_eq!(notifier.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_ends_streams_after_buffered_updates() {
        let notifier = notifier();
        let (mut stream, _) = notifier.subscribe(ClientData::ByUser(3));
        notifier.notify(&[n("before", ClientData::ByUser(3))]);

        assert_eq!(notifier.unsubscribe(|key, _| *key == ClientData::ByUser(3)), 1);
        notifier.notify(&[n("after", ClientData::ByUser(3))]);

        assert_eq!(stream.recv().await.as_deref(), Some("before"));
        assert_eq!(stream.recv().await, None);
    }

    #[test]
    fn notify_subscriber_reaches_only_that_subscription() {
        let notifier = notifier();
        let (mut first, first_id) = notifier.subscribe(ClientData::ByUser(1));
        let (mut second, _) = notifier.subscribe(ClientData::ByUser(1));

        notifier.notify_subscriber("direct".into(), first_id).unwrap();
        assert_eq!(first.try_recv().as_deref(), Some("direct"));
        assert_eq!(second.try_recv(), None);

        let never_issued = SubscriptionId::from_raw(u64::MAX);
        assert!(notifier.notify_subscriber("x".into(), never_issued).is_err());
    }

    #[test]
    fn stale_direct_delivery_falls_back_to_publish() {
        let notifier = notifier();
        let (stale, stale_id) = notifier.subscribe(ClientData::ByUser(8));
        drop(stale);
        let (mut other_device, _) = notifier.subscribe(ClientData::ByUser(8));

        notifier.notify_subscriber_or_publish("hello".into(), stale_id, ClientData::ByUser(8));
        assert_eq!(other_device.try_recv().as_deref(), Some("hello"));
    }

    #[test]
    fn publish_round_trips_through_the_broker() {
        let notifier = notifier();
        let (mut stream, _) = notifier.subscribe(ClientData::ByUser(1));
        notifier.publish("X".to_string(), [ClientData::ByUser(1), ClientData::ByUser(2)]);
        assert_eq!(stream.try_recv().as_deref(), Some("X"));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn listen_is_idempotent() {
        let notifier = notifier();
        assert!(!notifier.listen());
        let (mut stream, _) = notifier.subscribe(ClientData::ByUser(1));
        notifier.publish("once".to_string(), [ClientData::ByUser(1)]);
        assert_eq!(stream.try_recv().as_deref(), Some("once"));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn undecodable_payload_is_dropped() {
        let notifier = notifier();
        let (mut stream, _) = notifier.subscribe(ClientData::ByUser(1));
        notifier.notify_payload(b"not json");
        assert_eq!(stream.try_recv(), None);

        let err = decode_batch::<String, ClientData>(b"not json").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UndecodableBatch));
    }

    #[test]
    fn dropping_the_owner_frees_the_topic_for_a_new_notifier() {
        let broker = InMemoryBroker::standalone();
        let first = Arc::new(Notifier::<String, ClientData>::new(Topic::Messages, broker.clone()));
        assert!(first.listen());
        drop(first);
        assert!(!broker.has_listener(Topic::Messages));

        let second = Arc::new(Notifier::<String, ClientData>::new(Topic::Messages, broker.clone()));
        assert!(second.listen());
        let (mut stream, _) = second.subscribe(ClientData::ByUser(1));
        second.publish("after".to_string(), [ClientData::ByUser(1)]);
        assert_eq!(stream.try_recv().as_deref(), Some("after"));
    }

    #[test]
    fn dropping_a_non_owner_keeps_the_live_listener() {
        let broker = InMemoryBroker::standalone();
        let owner = Arc::new(Notifier::<String, ClientData>::new(Topic::Messages, broker.clone()));
        assert!(owner.listen());

        let latecomer = Arc::new(Notifier::<String, ClientData>::new(Topic::Messages, broker.clone()));
        assert!(!latecomer.listen());
        latecomer.shutdown();
        drop(latecomer);

        assert!(broker.has_listener(Topic::Messages));
        let (mut stream, _) = owner.subscribe(ClientData::ByUser(1));
        owner.publish("still here".to_string(), [ClientData::ByUser(1)]);
        assert_eq!(stream.try_recv().as_deref(), Some("still here"));
    }

    #[test]
    fn shutdown_ends_everything_and_detaches() {
        let notifier = notifier();
        let (_a, _) = notifier.subscribe(ClientData::ByUser(1));
        let (_b, _) = notifier.subscribe(ClientData::ByChat(1));
        notifier.shutdown();
        assert_eq!(notifier.subscriber_count(), 0);
        assert!(notifier.listen());
    }
}
