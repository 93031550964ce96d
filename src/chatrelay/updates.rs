//! Payloads pushed to live subscriptions, one enum per update kind.
//!
//! Every enum has a `CreatedSubscription` variant, sent to a fresh
//! subscription so the client knows it is live.

use serde::{Deserialize, Serialize};

use crate::notify::{ChatId, UserId};

pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub text: String,
    pub sent_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MessageUpdate {
    CreatedSubscription,
    NewMessage(Message),
    UpdatedMessage(Message),
    DeletedMessage { chat_id: ChatId, message_id: MessageId },
    /// Every message `user_id` sent in `chat_id` is gone
    UserChatMessagesRemoval { chat_id: ChatId, user_id: UserId },
    DeletionOfEveryMessage { chat_id: ChatId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AccountUpdate {
    CreatedSubscription,
    NewContact { user_id: UserId },
    UpdatedAccount(Account),
    DeletedContact { user_id: UserId },
    BlockedAccount { user_id: UserId },
    UnblockedAccount { user_id: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatUpdate {
    CreatedSubscription,
    /// The recipient was added to this group chat
    GroupChatId { chat_id: ChatId },
    DeletedPrivateChat { chat_id: ChatId },
    ExitedUsers { chat_id: ChatId, user_ids: Vec<UserId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GroupChatMetadataUpdate {
    CreatedSubscription,
    UpdatedGroupChat {
        chat_id: ChatId,
        title: Option<String>,
        description: Option<String>,
        new_users: Vec<UserId>,
        removed_users: Vec<UserId>,
        admin_ids: Option<Vec<UserId>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TypingStatusUpdate {
    CreatedSubscription,
    TypingStatus { chat_id: ChatId, user_id: UserId, is_typing: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OnlineStatusUpdate {
    CreatedSubscription,
    OnlineStatus {
        user_id: UserId,
        is_online: bool,
        /// Unix millis of the last time the user went offline
        last_online_ms: Option<u64>,
    },
}
