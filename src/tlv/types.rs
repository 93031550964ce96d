use log::{debug, error};
use crate::error::{ErrorCode, RelayError};

/// Frame types of the relay protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // Node -> hub
    Publish = 0x10,
    Subscribe = 0x11,
    Unsubscribe = 0x12,

    // Hub -> node
    Deliver = 0x13,

    // Responses
    Error = 0xF0,
    Ok = 0xF1,
}

impl EventType {
    /// Convert a u8 to an EventType
    pub fn from_u8(value: u8) -> Result<Self, RelayError> {
        debug!("Converting u8 to EventType: value = 0x{:02X}", value);

        match value {
            0x10 => Ok(Self::Publish),
            0x11 => Ok(Self::Subscribe),
            0x12 => Ok(Self::Unsubscribe),
            0x13 => Ok(Self::Deliver),
            0xF0 => Ok(Self::Error),
            0xF1 => Ok(Self::Ok),
            _ => {
                error!("Unknown event type: 0x{:02X}", value);
                Err(RelayError::new(
                    ErrorCode::InvalidEventType,
                    format!("Unknown event type: 0x{:02X}", value),
                ))
            },
        }
    }
}

/// Field types of the relay protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldType {
    Topic = 0x01,
    Payload = 0x02,
    Origin = 0x03,
    ErrorCode = 0x08,
    ErrorText = 0x09,
}

impl FieldType {
    /// Convert a u8 to a FieldType
    pub fn from_u8(value: u8) -> Result<Self, RelayError> {
        match value {
            0x01 => Ok(Self::Topic),
            0x02 => Ok(Self::Payload),
            0x03 => Ok(Self::Origin),
            0x08 => Ok(Self::ErrorCode),
            0x09 => Ok(Self::ErrorText),
            _ => Err(RelayError::new(
                ErrorCode::MalformedTlv,
                format!("Unknown field type: 0x{:02X}", value),
            )),
        }
    }
}
