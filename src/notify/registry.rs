use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard};

use log::{debug, trace};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::NotifyError;
use crate::notify::types::{Notification, SubscriptionId};

/// A live subscription. Dropping it drops the only sender of its stream,
/// which ends the stream once buffered updates are drained.
struct Subscription<T, D> {
    key: D,
    tx: UnboundedSender<T>,
}

/// Live subscriptions of one notifier in this process.
///
/// Every read and write goes through one mutex. Delivery is a push onto an
/// unbounded channel and never waits on the consumer, so holding the lock
/// while delivering is bounded by subscriptions × batch size.
///
/// The cost is memory: a consumer that keeps its stream open but stops
/// reading buffers every update addressed to it, without limit, until the
/// stream is dropped or unsubscribed.
pub(crate) struct SubscriptionRegistry<T, D> {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription<T, D>>>,
}

impl<T, D> SubscriptionRegistry<T, D>
where
    T: Clone + Send,
    D: PartialEq + Debug + Send,
{
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    // A poisoned registry means a panic mid-mutation; there is no state worth
    // recovering.
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Subscription<T, D>>> {
        self.subscriptions.lock().expect("subscription registry mutex poisoned")
    }

    pub(crate) fn insert(&self, key: D) -> (SubscriptionId, UnboundedReceiver<T>) {
        let id = SubscriptionId::next();
        let (tx, rx) = unbounded_channel();
        debug!("Registering subscription {} for key {:?}", id, key);

        let previous = self.lock().insert(id, Subscription { key, tx });
        assert!(previous.is_none(), "subscription id {} issued twice", id);
        (id, rx)
    }

    /// Idempotent removal. Returns whether this call removed the subscription.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(subscription) => {
                debug!("Removed subscription {} for key {:?}", id, subscription.key);
                true
            },
            None => {
                trace!("Subscription {} already removed", id);
                false
            },
        }
    }

    /// Snapshot of the ids whose subscription satisfies `predicate`
    pub(crate) fn matching<F>(&self, predicate: F) -> Vec<SubscriptionId>
    where
        F: Fn(&D, SubscriptionId) -> bool,
    {
        self.lock()
            .iter()
            .filter(|(id, subscription)| predicate(&subscription.key, **id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Push every matching update of `batch` onto every subscription.
    /// Returns the number of updates enqueued.
    pub(crate) fn deliver(&self, batch: &[Notification<T, D>]) -> usize {
        let subscriptions = self.lock();
        let mut delivered = 0;

        for (id, subscription) in subscriptions.iter() {
            for notification in batch.iter().filter(|n| *n.key() == subscription.key) {
                match subscription.tx.send(notification.update().clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => {
                        // consumer is gone, its drop hook is about to remove it
                        debug!("Skipping closed subscription {}", id);
                        break;
                    },
                }
            }
        }

        delivered
    }

    pub(crate) fn deliver_to(&self, id: SubscriptionId, update: T) -> Result<(), NotifyError> {
        let subscriptions = self.lock();
        let subscription = subscriptions
            .get(&id)
            .ok_or(NotifyError::UnknownSubscription(id))?;

        subscription
            .tx
            .send(update)
            .map_err(|_| NotifyError::UnknownSubscription(id))
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
