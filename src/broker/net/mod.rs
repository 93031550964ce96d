//! TCP relay hub speaking the TLV protocol

pub mod connection;
pub mod connections;
pub mod handler;
pub mod server;
pub mod subscriptions;

pub type ConnectionId = uuid::Uuid;

pub use server::RelayHub;
