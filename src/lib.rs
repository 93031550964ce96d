//! Real-time update distribution for a horizontally scaled chat backend.
//!
//! Each update kind has a [`notify::Notifier`] that publishes batches through an
//! [`broker::ExternalBroker`] and, in every process listening on the topic,
//! delivers them to the local subscriptions whose key matches.

pub mod broker;
pub mod chatrelay;
pub mod error;
pub mod notify;
pub mod tlv;
