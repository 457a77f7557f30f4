//! Messages: a type tag plus ordered items.
//!
//! Wire layout (all integers little-endian):
//!
//! ```text
//! +------+-------------+---------------------------+---------+
//! | tag  | length: u32 | items (length bytes)      | trailer |
//! | u8   |             | code u16 | len u16 | data  | u8      |
//! +------+-------------+---------------------------+---------+
//! ```

use std::fmt;

use aiod_core::{ConnectionId, ErrorKind};

use crate::item::Item;

/// Bytes before the item payload: tag and length.
pub const HEADER_LEN: usize = 5;
/// Bytes after the item payload.
pub const TRAILER_LEN: usize = 1;
/// Trailer value written on every outgoing message.
pub const TRAILER: u8 = 0x00;
/// Bytes of an item header: code and length.
pub const ITEM_HEADER_LEN: usize = 4;

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Read request
    Query = b'Q',
    /// Write request
    Config = b'C',
    /// Successful reply
    Response = b'R',
    /// Reply with at least one failed item
    Error = b'X',
    /// Greeting sent on connect
    Hello = b'H',
}

impl MessageType {
    /// Decode a wire tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'Q' => Some(Self::Query),
            b'C' => Some(Self::Config),
            b'R' => Some(Self::Response),
            b'X' => Some(Self::Error),
            b'H' => Some(Self::Hello),
            _ => None,
        }
    }

    /// Wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether items of this type carry results rather than requests.
    pub fn is_reply(self) -> bool {
        matches!(self, Self::Response | Self::Error | Self::Hello)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag() as char)
    }
}

/// One framed message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Type tag
    pub kind: MessageType,
    /// Items in wire order
    pub items: Vec<Item>,
    /// Trailer byte as received; outgoing messages always write [`TRAILER`]
    pub trailer: u8,
}

impl Message {
    /// Message with the default trailer.
    pub fn new(kind: MessageType, items: Vec<Item>) -> Self {
        Self {
            kind,
            items,
            trailer: TRAILER,
        }
    }

    /// Greeting sent on every new control connection.
    pub fn hello(connection: ConnectionId) -> Self {
        Self::new(MessageType::Hello, vec![Item::connection_id(connection)])
    }

    /// Error message carrying a single diagnostic.
    pub fn error(kind: ErrorKind, message: &str) -> Self {
        Self::new(MessageType::Error, vec![Item::diagnostic(kind, message)])
    }

    /// Whether any item failed (at parse time or during execution).
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Item::is_failed)
    }

    /// Reply built from the executed items of this request.
    pub fn into_reply(self) -> Message {
        let kind = if self.has_errors() {
            MessageType::Error
        } else {
            MessageType::Response
        };
        Message::new(kind, self.items)
    }

    /// Encode for the wire. Reply-type messages serialize item results.
    pub fn encode(&self) -> Vec<u8> {
        let as_reply = self.kind.is_reply();
        let mut items = Vec::new();
        for item in &self.items {
            item.encode(as_reply, &mut items);
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + items.len() + TRAILER_LEN);
        buf.push(self.kind.tag());
        buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
        buf.extend_from_slice(&items);
        buf.push(TRAILER);
        buf
    }

    /// Item descriptions for logs.
    pub fn describe(&self) -> String {
        let as_reply = self.kind.is_reply();
        let items: Vec<String> = self.items.iter().map(|i| i.describe(as_reply)).collect();
        format!("{} [{}]", self.kind, items.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_tags() {
        for kind in [
            MessageType::Query,
            MessageType::Config,
            MessageType::Response,
            MessageType::Error,
            MessageType::Hello,
        ] {
            assert_eq!(MessageType::from_u8(kind.tag()), Some(kind));
        }
        assert_eq!(MessageType::from_u8(b'Z'), None);
        assert_eq!(MessageType::Error.tag(), b'X');
    }

    #[test]
    fn test_hello_encoding() {
        let bytes = Message::hello(ConnectionId(5)).encode();
        assert_eq!(
            bytes,
            vec![b'H', 8, 0, 0, 0, 0x01, 0x80, 4, 0, 5, 0, 0, 0, TRAILER]
        );
    }

    #[test]
    fn test_error_message_has_diagnostic() {
        let msg = Message::error(ErrorKind::Framing, "bad");
        assert_eq!(msg.kind, MessageType::Error);
        let bytes = msg.encode();
        // tag, len, code 0x8002, len 4, kind 1, "bad", trailer
        assert_eq!(&bytes[5..9], &[0x02, 0x80, 4, 0]);
        assert_eq!(&bytes[9..13], &[1, b'b', b'a', b'd']);
    }
}
