use std::collections::BTreeMap;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};
use crate::error::{ErrorCode, RelayError};
use crate::tlv::types::{EventType, FieldType};

/// Upper bound for a single frame, header included
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

const HEADER_LEN: usize = 5; // 4 bytes length + 1 byte event type
const FIELD_HEADER_LEN: usize = 5; // 1 byte field type + 4 bytes length

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TLVMessage {
    pub event_type: EventType,
    fields: BTreeMap<FieldType, Bytes>,
}

impl TLVMessage {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            fields: BTreeMap::new(),
        }
    }

    /// `Error` frame with a code and text
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        let mut msg = Self::new(EventType::Error);
        msg.insert_field(FieldType::ErrorCode, Bytes::copy_from_slice(&code.as_u16().to_be_bytes()));
        let text: String = text.into();
        msg.insert_field(FieldType::ErrorText, text);
        msg
    }

    /// Parse a complete frame, length prefix included
    pub fn parse(mut raw: Bytes) -> Result<Self, RelayError> {
        if raw.len() < HEADER_LEN {
            return Err(RelayError::new(
                ErrorCode::IncompleteMessage,
                "Message too short",
            ));
        }

        debug!("Parsing message: first bytes = {:?}", &raw[..std::cmp::min(10, raw.len())]);

        let length = raw.get_u32() as usize;
        if length != raw.len() + 4 {
            return Err(RelayError::new(
                ErrorCode::MalformedTlv,
                format!("Length header {} does not match frame size {}", length, raw.len() + 4),
            ));
        }

        let event_type = EventType::from_u8(raw.get_u8())?;
        let mut fields = BTreeMap::new();

        while raw.has_remaining() {
            if raw.remaining() < FIELD_HEADER_LEN {
                return Err(RelayError::new(
                    ErrorCode::MalformedTlv,
                    "Truncated field header",
                ));
            }

            let field_type = FieldType::from_u8(raw.get_u8())?;
            let field_len = raw.get_u32() as usize;

            if raw.remaining() < field_len {
                return Err(RelayError::new(
                    ErrorCode::MalformedTlv,
                    "Incomplete TLV field",
                ));
            }

            // zero-copy slice of the frame
            fields.insert(field_type, raw.split_to(field_len));
        }

        Ok(Self { event_type, fields })
    }

    /// Serialize the frame, length prefix included
    pub fn encode(&self) -> Result<Bytes, RelayError> {
        let total_size = HEADER_LEN
            + self
                .fields
                .values()
                .map(|value| FIELD_HEADER_LEN + value.len())
                .sum::<usize>();

        if total_size > MAX_MESSAGE_SIZE {
            debug!("Message too large: {} bytes (maximum: {} bytes)", total_size, MAX_MESSAGE_SIZE);
            return Err(RelayError::new(
                ErrorCode::FrameTooLarge,
                format!("Frame of {} bytes exceeds {} bytes", total_size, MAX_MESSAGE_SIZE),
            ));
        }

        let mut msg = BytesMut::with_capacity(total_size);
        msg.put_u32(total_size as u32);
        msg.put_u8(self.event_type as u8);

        for (field_type, value) in &self.fields {
            msg.put_u8(*field_type as u8);
            msg.put_u32(value.len() as u32);
            msg.extend_from_slice(value);
        }

        debug!("Encoded {:?} frame of {} bytes", self.event_type, msg.len());
        Ok(msg.freeze())
    }

    /// Read one frame from a stream.
    ///
    /// Returns `Ok(None)` on a clean end of stream before a new frame starts.
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<Self>, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(RelayError::new(ErrorCode::ReadFailed, format!("Failed to read frame header: {}", e)));
            }
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len < HEADER_LEN {
            return Err(RelayError::new(ErrorCode::MalformedTlv, format!("Frame length {} below header size", len)));
        }
        if len > MAX_MESSAGE_SIZE {
            return Err(RelayError::new(ErrorCode::FrameTooLarge, format!("Frame length {} exceeds maximum", len)));
        }

        let mut full = BytesMut::with_capacity(len);
        full.extend_from_slice(&len_buf);
        full.resize(len, 0);
        reader
            .read_exact(&mut full[4..])
            .await
            .map_err(|e| RelayError::new(ErrorCode::ReadFailed, format!("Failed to read frame body: {}", e)))?;

        Self::parse(full.freeze()).map(Some)
    }

    pub fn get_field(&self, field: FieldType) -> Option<&Bytes> {
        self.fields.get(&field)
    }

    /// Like `get_field`, but a missing field is a protocol error
    pub fn require_field(&self, field: FieldType) -> Result<&Bytes, RelayError> {
        self.fields.get(&field).ok_or_else(|| {
            RelayError::new(
                ErrorCode::MissingField,
                format!("{:?} frame is missing field {:?}", self.event_type, field),
            )
        })
    }

    /// Set or overwrite a field
    pub fn insert_field<V: Into<Bytes>>(&mut self, field: FieldType, value: V) {
        self.fields.insert(field, value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_frame() -> TLVMessage {
        let mut msg = TLVMessage::new(EventType::Publish);
        msg.insert_field(FieldType::Topic, "messages");
        msg.insert_field(FieldType::Payload, Bytes::from_static(b"[{\"update\":1}]"));
        msg
    }

    #[test]
    fn encoded_frame_parses_back() {
        let msg = publish_frame();
        let raw = msg.encode().unwrap();
        assert_eq!(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize, raw.len());
        assert_eq!(raw[4], EventType::Publish as u8);

        let parsed = TLVMessage::parse(raw).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.get_field(FieldType::Topic).unwrap().as_ref(), b"messages");
    }

    #[test]
    fn rejects_short_and_truncated_frames() {
        let err = TLVMessage::parse(Bytes::from_static(&[0, 0, 0])).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::IncompleteMessage));

        let raw = publish_frame().encode().unwrap();
        let truncated = raw.slice(..raw.len() - 3);
        assert!(TLVMessage::parse(truncated).is_err());
    }

    #[test]
    fn rejects_unknown_event_type() {
        let raw = Bytes::from_static(&[0, 0, 0, 5, 0x77]);
        let err = TLVMessage::parse(raw).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidEventType));
    }

    #[test]
    fn require_field_reports_missing_field() {
        let msg = TLVMessage::new(EventType::Subscribe);
        let err = msg.require_field(FieldType::Topic).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::MissingField));
    }

    #[test]
    fn error_frame_carries_code() {
        let msg = TLVMessage::error(ErrorCode::MalformedTlv, "bad frame");
        let code = msg.get_field(FieldType::ErrorCode).unwrap();
        assert_eq!(u16::from_be_bytes([code[0], code[1]]), 0x0002);
        assert_eq!(msg.get_field(FieldType::ErrorText).unwrap().as_ref(), b"bad frame");
    }

    #[tokio::test]
    async fn reads_consecutive_frames_from_a_stream() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&publish_frame().encode().unwrap());
        let mut sub = TLVMessage::new(EventType::Subscribe);
        sub.insert_field(FieldType::Topic, "chats");
        wire.extend_from_slice(&sub.encode().unwrap());

        let mut reader = wire.as_slice();
        let first = TLVMessage::read_from(&mut reader).await.unwrap().unwrap();
        let second = TLVMessage::read_from(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.event_type, EventType::Publish);
        assert_eq!(second, sub);
        assert!(TLVMessage::read_from(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_oversized_length_prefix() {
        let wire = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes();
        let mut reader = &wire[..];
        let err = TLVMessage::read_from(&mut reader).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FrameTooLarge));
    }
}
