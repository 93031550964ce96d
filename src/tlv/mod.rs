pub mod message;
pub mod types;

pub use message::{TLVMessage, MAX_MESSAGE_SIZE};
pub use types::{EventType, FieldType};
