//! Publishing side used by the CRUD layer.
//!
//! Each method is called right after the corresponding mutation has been
//! committed. Recipients are computed from the [`Directory`] as it stands after
//! the mutation and are always an explicit key set.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;

use crate::chatrelay::notifiers::Notifiers;
use crate::chatrelay::updates::{
    Account, AccountUpdate, ChatUpdate, GroupChatMetadataUpdate, Message, MessageId, MessageUpdate,
    OnlineStatusUpdate, TypingStatusUpdate,
};
use crate::notify::{ChatId, ClientData, UserId};

/// Read-only view of chat membership and contacts, owned by the CRUD layer
pub trait Directory: Send + Sync {
    fn chat_members(&self, chat_id: ChatId) -> Vec<UserId>;

    /// Users who have `user_id` saved as a contact
    fn contact_owners(&self, user_id: UserId) -> Vec<UserId>;

    fn chats_of(&self, user_id: UserId) -> Vec<ChatId>;

    /// Public chats can be followed without membership, by chat id
    fn is_public_chat(&self, chat_id: ChatId) -> bool;
}

pub struct Dispatcher {
    notifiers: Arc<Notifiers>,
    directory: Arc<dyn Directory>,
}

fn by_user<I: IntoIterator<Item = UserId>>(users: I) -> Vec<ClientData> {
    users.into_iter().map(ClientData::ByUser).collect()
}

impl Dispatcher {
    pub fn new(notifiers: Arc<Notifiers>, directory: Arc<dyn Directory>) -> Self {
        Self { notifiers, directory }
    }

    pub fn notifiers(&self) -> &Notifiers {
        &self.notifiers
    }

    /// `ByChat` key if outsiders may follow the chat, nothing otherwise
    fn chat_key(&self, chat_id: ChatId) -> Option<ClientData> {
        self.directory
            .is_public_chat(chat_id)
            .then_some(ClientData::ByChat(chat_id))
    }

    /// The user, everyone who saved them as a contact, and everyone sharing a
    /// chat with them
    fn audience_of(&self, user_id: UserId) -> BTreeSet<UserId> {
        let mut audience: BTreeSet<UserId> = self.directory.contact_owners(user_id).into_iter().collect();
        for chat_id in self.directory.chats_of(user_id) {
            audience.extend(self.directory.chat_members(chat_id));
        }
        audience.insert(user_id);
        audience
    }

    fn publish_message_update(&self, chat_id: ChatId, update: MessageUpdate) {
        let members = self.directory.chat_members(chat_id);
        debug!("Message update for chat {} to {} member(s)", chat_id, members.len());
        self.notifiers.messages.publish(update.clone(), by_user(members));
        self.notifiers.chat_messages.publish(update, self.chat_key(chat_id));
    }

    pub fn message_created(&self, message: &Message) {
        self.publish_message_update(message.chat_id, MessageUpdate::NewMessage(message.clone()));
    }

    pub fn message_updated(&self, message: &Message) {
        self.publish_message_update(message.chat_id, MessageUpdate::UpdatedMessage(message.clone()));
    }

    pub fn message_deleted(&self, chat_id: ChatId, message_id: MessageId) {
        self.publish_message_update(chat_id, MessageUpdate::DeletedMessage { chat_id, message_id });
    }

    pub fn user_messages_removed(&self, chat_id: ChatId, user_id: UserId) {
        self.publish_message_update(chat_id, MessageUpdate::UserChatMessagesRemoval { chat_id, user_id });
    }

    pub fn chat_messages_cleared(&self, chat_id: ChatId) {
        self.publish_message_update(chat_id, MessageUpdate::DeletionOfEveryMessage { chat_id });
    }

    pub fn contact_added(&self, owner_id: UserId, contact_id: UserId) {
        self.notifiers
            .accounts
            .publish(AccountUpdate::NewContact { user_id: contact_id }, [ClientData::ByUser(owner_id)]);
    }

    pub fn contact_removed(&self, owner_id: UserId, contact_id: UserId) {
        self.notifiers
            .accounts
            .publish(AccountUpdate::DeletedContact { user_id: contact_id }, [ClientData::ByUser(owner_id)]);
    }

    pub fn user_blocked(&self, blocker_id: UserId, blocked_id: UserId) {
        self.notifiers
            .accounts
            .publish(AccountUpdate::BlockedAccount { user_id: blocked_id }, [ClientData::ByUser(blocker_id)]);
    }

    pub fn user_unblocked(&self, blocker_id: UserId, unblocked_id: UserId) {
        self.notifiers
            .accounts
            .publish(AccountUpdate::UnblockedAccount { user_id: unblocked_id }, [ClientData::ByUser(blocker_id)]);
    }

    pub fn account_updated(&self, account: &Account) {
        let update = AccountUpdate::UpdatedAccount(account.clone());
        self.notifiers
            .accounts
            .publish(update.clone(), by_user(self.audience_of(account.id)));

        let public_chats: Vec<ClientData> = self
            .directory
            .chats_of(account.id)
            .into_iter()
            .filter_map(|chat_id| self.chat_key(chat_id))
            .collect();
        self.notifiers.chat_accounts.publish(update, public_chats);
    }

    /// The account is gone: contacts are told and every subscription it held
    /// is ended
    pub fn account_deleted(&self, user_id: UserId, former_contact_owners: &[UserId]) {
        self.notifiers.accounts.publish(
            AccountUpdate::DeletedContact { user_id },
            by_user(former_contact_owners.iter().copied()),
        );
        self.notifiers.revoke(ClientData::ByUser(user_id));
    }

    pub fn added_to_group_chat(&self, chat_id: ChatId, new_users: &[UserId]) {
        self.notifiers
            .chats
            .publish(ChatUpdate::GroupChatId { chat_id }, by_user(new_users.iter().copied()));

        self.publish_metadata(
            chat_id,
            GroupChatMetadataUpdate::UpdatedGroupChat {
                chat_id,
                title: None,
                description: None,
                new_users: new_users.to_vec(),
                removed_users: Vec::new(),
                admin_ids: None,
            },
        );
    }

    pub fn exited_group_chat(&self, chat_id: ChatId, user_ids: &[UserId]) {
        let remaining = self.directory.chat_members(chat_id);
        self.notifiers.chats.publish(
            ChatUpdate::ExitedUsers { chat_id, user_ids: user_ids.to_vec() },
            by_user(remaining),
        );

        self.publish_metadata(
            chat_id,
            GroupChatMetadataUpdate::UpdatedGroupChat {
                chat_id,
                title: None,
                description: None,
                new_users: Vec::new(),
                removed_users: user_ids.to_vec(),
                admin_ids: None,
            },
        );
    }

    pub fn group_chat_updated(
        &self,
        chat_id: ChatId,
        title: Option<String>,
        description: Option<String>,
        admin_ids: Option<Vec<UserId>>,
    ) {
        self.publish_metadata(
            chat_id,
            GroupChatMetadataUpdate::UpdatedGroupChat {
                chat_id,
                title,
                description,
                new_users: Vec::new(),
                removed_users: Vec::new(),
                admin_ids,
            },
        );
    }

    fn publish_metadata(&self, chat_id: ChatId, update: GroupChatMetadataUpdate) {
        let mut keys = by_user(self.directory.chat_members(chat_id));
        keys.extend(self.chat_key(chat_id));
        self.notifiers.group_chat_metadata.publish(update, keys);
    }

    /// Public chat turned private: outsiders following it by chat lose access
    pub fn chat_made_private(&self, chat_id: ChatId) -> usize {
        self.revoke_chat(chat_id)
    }

    pub fn private_chat_deleted(&self, chat_id: ChatId, participants: &[UserId]) {
        self.notifiers.chats.publish(
            ChatUpdate::DeletedPrivateChat { chat_id },
            by_user(participants.iter().copied()),
        );
        self.revoke_chat(chat_id);
    }

    fn revoke_chat(&self, chat_id: ChatId) -> usize {
        self.notifiers.revoke(ClientData::ByChat(chat_id))
    }

    pub fn typing_status_changed(&self, chat_id: ChatId, user_id: UserId, is_typing: bool) {
        let update = TypingStatusUpdate::TypingStatus { chat_id, user_id, is_typing };
        let others = self
            .directory
            .chat_members(chat_id)
            .into_iter()
            .filter(|member| *member != user_id);
        self.notifiers.typing_statuses.publish(update.clone(), by_user(others));
        self.notifiers.chat_typing_statuses.publish(update, self.chat_key(chat_id));
    }

    pub fn online_status_changed(&self, user_id: UserId, is_online: bool, last_online_ms: Option<u64>) {
        let update = OnlineStatusUpdate::OnlineStatus { user_id, is_online, last_online_ms };
        let mut audience = self.audience_of(user_id);
        audience.remove(&user_id);
        self.notifiers.online_statuses.publish(update.clone(), by_user(audience));

        let public_chats: Vec<ClientData> = self
            .directory
            .chats_of(user_id)
            .into_iter()
            .filter_map(|chat_id| self.chat_key(chat_id))
            .collect();
        self.notifiers.chat_online_statuses.publish(update, public_chats);
    }
}
