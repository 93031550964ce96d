pub mod notifier;
mod registry;
pub mod stream;
pub mod types;

pub use notifier::Notifier;
pub use stream::SubscriptionStream;
pub use types::{ChatId, ClientData, Notification, SubscriptionId, Topic, UserId};
