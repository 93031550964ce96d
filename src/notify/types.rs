use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ChatId = i64;

/// Broker channel, one per notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Messages,
    ChatMessages,
    Accounts,
    ChatAccounts,
    Chats,
    GroupChatMetadata,
    TypingStatuses,
    ChatTypingStatuses,
    OnlineStatuses,
    ChatOnlineStatuses,
}

impl Topic {
    pub const ALL: [Topic; 10] = [
        Topic::Messages,
        Topic::ChatMessages,
        Topic::Accounts,
        Topic::ChatAccounts,
        Topic::Chats,
        Topic::GroupChatMetadata,
        Topic::TypingStatuses,
        Topic::ChatTypingStatuses,
        Topic::OnlineStatuses,
        Topic::ChatOnlineStatuses,
    ];

    /// Channel name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Messages => "messages",
            Topic::ChatMessages => "chat_messages",
            Topic::Accounts => "accounts",
            Topic::ChatAccounts => "chat_accounts",
            Topic::Chats => "chats",
            Topic::GroupChatMetadata => "group_chat_metadata",
            Topic::TypingStatuses => "typing_statuses",
            Topic::ChatTypingStatuses => "chat_typing_statuses",
            Topic::OnlineStatuses => "online_statuses",
            Topic::ChatOnlineStatuses => "chat_online_statuses",
        }
    }

    pub fn from_wire(name: &[u8]) -> Option<Topic> {
        Topic::ALL.into_iter().find(|topic| topic.as_str().as_bytes() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter key naming the intended recipients of an update.
///
/// Matching is by value: two keys holding the same id are the same recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientData {
    ByUser(UserId),
    ByChat(ChatId),
}

impl ClientData {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            ClientData::ByUser(id) => Some(*id),
            ClientData::ByChat(_) => None,
        }
    }

    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            ClientData::ByChat(id) => Some(*id),
            ClientData::ByUser(_) => None,
        }
    }
}

/// One update addressed to one key. Batches of these are what travel
/// through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification<T, D> {
    update: T,
    key: D,
}

impl<T, D> Notification<T, D> {
    pub(crate) fn new(update: T, key: D) -> Self {
        Self { update, key }
    }

    pub fn update(&self) -> &T {
        &self.update
    }

    pub fn key(&self) -> &D {
        &self.key
    }
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-local subscription handle.
///
/// Unique for the lifetime of this process only; ids from other processes or
/// earlier runs may collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw value, e.g. one echoed back by a client
    pub fn from_raw(raw: u64) -> Self {
        SubscriptionId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
