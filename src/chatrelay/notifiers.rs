use std::sync::Arc;

use log::{info, warn};

use crate::broker::ExternalBroker;
use crate::chatrelay::updates::{
    AccountUpdate, ChatUpdate, GroupChatMetadataUpdate, MessageUpdate, OnlineStatusUpdate, TypingStatusUpdate,
};
use crate::notify::{ChatId, ClientData, Notifier, SubscriptionId, SubscriptionStream, Topic, UserId};

/// Update kinds that can greet a fresh subscription
pub trait LiveUpdate {
    fn created_subscription() -> Self;
}

macro_rules! live_update {
    ($($update:ty),* $(,)?) => {
        $(impl LiveUpdate for $update {
            fn created_subscription() -> Self {
                Self::CreatedSubscription
            }
        })*
    };
}

live_update!(
    MessageUpdate,
    AccountUpdate,
    ChatUpdate,
    GroupChatMetadataUpdate,
    TypingStatusUpdate,
    OnlineStatusUpdate,
);

pub type Live<T> = (SubscriptionStream<T>, SubscriptionId);

/// The process's notifiers, one per topic.
///
/// Built once at startup around the process's broker connection and handed to
/// whatever needs it. `bootstrap` attaches them to the broker, `shutdown`
/// detaches them and ends every live subscription.
pub struct Notifiers {
    pub messages: Arc<Notifier<MessageUpdate, ClientData>>,
    pub chat_messages: Arc<Notifier<MessageUpdate, ClientData>>,
    pub accounts: Arc<Notifier<AccountUpdate, ClientData>>,
    pub chat_accounts: Arc<Notifier<AccountUpdate, ClientData>>,
    pub chats: Arc<Notifier<ChatUpdate, ClientData>>,
    pub group_chat_metadata: Arc<Notifier<GroupChatMetadataUpdate, ClientData>>,
    pub typing_statuses: Arc<Notifier<TypingStatusUpdate, ClientData>>,
    pub chat_typing_statuses: Arc<Notifier<TypingStatusUpdate, ClientData>>,
    pub online_statuses: Arc<Notifier<OnlineStatusUpdate, ClientData>>,
    pub chat_online_statuses: Arc<Notifier<OnlineStatusUpdate, ClientData>>,
}

impl Notifiers {
    pub fn new(broker: Arc<dyn ExternalBroker>) -> Self {
        Self {
            messages: Arc::new(Notifier::new(Topic::Messages, broker.clone())),
            chat_messages: Arc::new(Notifier::new(Topic::ChatMessages, broker.clone())),
            accounts: Arc::new(Notifier::new(Topic::Accounts, broker.clone())),
            chat_accounts: Arc::new(Notifier::new(Topic::ChatAccounts, broker.clone())),
            chats: Arc::new(Notifier::new(Topic::Chats, broker.clone())),
            group_chat_metadata: Arc::new(Notifier::new(Topic::GroupChatMetadata, broker.clone())),
            typing_statuses: Arc::new(Notifier::new(Topic::TypingStatuses, broker.clone())),
            chat_typing_statuses: Arc::new(Notifier::new(Topic::ChatTypingStatuses, broker.clone())),
            online_statuses: Arc::new(Notifier::new(Topic::OnlineStatuses, broker.clone())),
            chat_online_statuses: Arc::new(Notifier::new(Topic::ChatOnlineStatuses, broker)),
        }
    }

    /// Register every notifier as its topic's broker listener. Repeated calls
    /// register nothing new. Returns how many listeners this call added.
    pub fn bootstrap(&self) -> usize {
        let added = [
            self.messages.listen(),
            self.chat_messages.listen(),
            self.accounts.listen(),
            self.chat_accounts.listen(),
            self.chats.listen(),
            self.group_chat_metadata.listen(),
            self.typing_statuses.listen(),
            self.chat_typing_statuses.listen(),
            self.online_statuses.listen(),
            self.chat_online_statuses.listen(),
        ]
        .into_iter()
        .filter(|added| *added)
        .count();

        info!("Notifier bootstrap registered {} new listener(s)", added);
        added
    }

    pub fn shutdown(&self) {
        self.messages.shutdown();
        self.chat_messages.shutdown();
        self.accounts.shutdown();
        self.chat_accounts.shutdown();
        self.chats.shutdown();
        self.group_chat_metadata.shutdown();
        self.typing_statuses.shutdown();
        self.chat_typing_statuses.shutdown();
        self.online_statuses.shutdown();
        self.chat_online_statuses.shutdown();
        info!("All notifiers shut down");
    }

    /// End every subscription keyed to `key`, on every topic
    pub fn revoke(&self, key: ClientData) -> usize {
        let matches = |k: &ClientData, _: SubscriptionId| *k == key;
        let revoked = self.messages.unsubscribe(matches)
            + self.chat_messages.unsubscribe(matches)
            + self.accounts.unsubscribe(matches)
            + self.chat_accounts.unsubscribe(matches)
            + self.chats.unsubscribe(matches)
            + self.group_chat_metadata.unsubscribe(matches)
            + self.typing_statuses.unsubscribe(matches)
            + self.chat_typing_statuses.unsubscribe(matches)
            + self.online_statuses.unsubscribe(matches)
            + self.chat_online_statuses.unsubscribe(matches);

        info!("Revoked {} subscription(s) for {:?}", revoked, key);
        revoked
    }

    pub fn subscribe_to_messages(&self, user_id: UserId) -> Live<MessageUpdate> {
        open(&self.messages, ClientData::ByUser(user_id))
    }

    pub fn subscribe_to_chat_messages(&self, chat_id: ChatId) -> Live<MessageUpdate> {
        open(&self.chat_messages, ClientData::ByChat(chat_id))
    }

    pub fn subscribe_to_accounts(&self, user_id: UserId) -> Live<AccountUpdate> {
        open(&self.accounts, ClientData::ByUser(user_id))
    }

    pub fn subscribe_to_chat_accounts(&self, chat_id: ChatId) -> Live<AccountUpdate> {
        open(&self.chat_accounts, ClientData::ByChat(chat_id))
    }

    pub fn subscribe_to_chats(&self, user_id: UserId) -> Live<ChatUpdate> {
        open(&self.chats, ClientData::ByUser(user_id))
    }

    /// Members subscribe by user, viewers of a public chat by chat
    pub fn subscribe_to_group_chat_metadata(&self, key: ClientData) -> Live<GroupChatMetadataUpdate> {
        open(&self.group_chat_metadata, key)
    }

    pub fn subscribe_to_typing_statuses(&self, user_id: UserId) -> Live<TypingStatusUpdate> {
        open(&self.typing_statuses, ClientData::ByUser(user_id))
    }

    pub fn subscribe_to_chat_typing_statuses(&self, chat_id: ChatId) -> Live<TypingStatusUpdate> {
        open(&self.chat_typing_statuses, ClientData::ByChat(chat_id))
    }

    pub fn subscribe_to_online_statuses(&self, user_id: UserId) -> Live<OnlineStatusUpdate> {
        open(&self.online_statuses, ClientData::ByUser(user_id))
    }

    pub fn subscribe_to_chat_online_statuses(&self, chat_id: ChatId) -> Live<OnlineStatusUpdate> {
        open(&self.chat_online_statuses, ClientData::ByChat(chat_id))
    }
}

/// Subscribe and greet the new subscription directly, without a broker round trip
fn open<T>(notifier: &Notifier<T, ClientData>, key: ClientData) -> Live<T>
where
    T: LiveUpdate + Clone + serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
{
    let (stream, id) = notifier.subscribe(key);
    if let Err(e) = notifier.notify_subscriber(T::created_subscription(), id) {
        warn!("[{}] could not greet subscription {}: {}", notifier.topic(), id, e);
    }
    (stream, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;

    #[test]
    fn bootstrap_is_idempotent() {
        let notifiers = Notifiers::new(InMemoryBroker::standalone());
        assert_eq!(notifiers.bootstrap(), Topic::ALL.len());
        assert_eq!(notifiers.bootstrap(), 0);
    }

    #[test]
    fn fresh_subscriptions_are_greeted() {
        let notifiers = Notifiers::new(InMemoryBroker::standalone());
        notifiers.bootstrap();

        let (mut messages, _) = notifiers.subscribe_to_messages(1);
        let (mut typing, _) = notifiers.subscribe_to_chat_typing_statuses(9);
        assert_eq!(messages.try_recv(), Some(MessageUpdate::CreatedSubscription));
        assert_eq!(typing.try_recv(), Some(TypingStatusUpdate::CreatedSubscription));
        assert_eq!(messages.try_recv(), None);
    }

    #[tokio::test]
    async fn revoke_ends_only_that_key() {
        let notifiers = Notifiers::new(InMemoryBroker::standalone());
        notifiers.bootstrap();

        let (mut gone, _) = notifiers.subscribe_to_accounts(3);
        let (mut also_gone, _) = notifiers.subscribe_to_online_statuses(3);
        let (mut kept, _) = notifiers.subscribe_to_accounts(4);

        assert_eq!(notifiers.revoke(ClientData::ByUser(3)), 2);
        assert_eq!(gone.recv().await, Some(AccountUpdate::CreatedSubscription));
        assert_eq!(gone.recv().await, None);
        assert_eq!(also_gone.recv().await, Some(OnlineStatusUpdate::CreatedSubscription));
        assert_eq!(also_gone.recv().await, None);
        assert_eq!(kept.try_recv(), Some(AccountUpdate::CreatedSubscription));
        assert_eq!(notifiers.accounts.subscriber_count(), 1);
    }

    #[test]
    fn shutdown_detaches_and_allows_a_new_bootstrap() {
        let broker = InMemoryBroker::standalone();
        let notifiers = Notifiers::new(broker.clone());
        notifiers.bootstrap();
        let (_stream, _) = notifiers.subscribe_to_chats(1);

        notifiers.shutdown();
        assert_eq!(notifiers.chats.subscriber_count(), 0);
        assert!(!broker.has_listener(Topic::Chats));
        assert_eq!(notifiers.bootstrap(), Topic::ALL.len());
    }

    #[test]
    fn dropped_notifiers_can_be_rebuilt_on_the_same_broker() {
        let broker = InMemoryBroker::standalone();
        let first = Notifiers::new(broker.clone());
        first.bootstrap();
        drop(first);
        assert!(Topic::ALL.iter().all(|topic| !broker.has_listener(*topic)));

        let second = Notifiers::new(broker.clone());
        assert_eq!(second.bootstrap(), Topic::ALL.len());

        let (mut stream, _) = second.subscribe_to_messages(1);
        assert_eq!(stream.try_recv(), Some(MessageUpdate::CreatedSubscription));
        second
            .messages
            .publish(MessageUpdate::DeletionOfEveryMessage { chat_id: 7 }, [ClientData::ByUser(1)]);
        assert_eq!(stream.try_recv(), Some(MessageUpdate::DeletionOfEveryMessage { chat_id: 7 }));
    }
}
