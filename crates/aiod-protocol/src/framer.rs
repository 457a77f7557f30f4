//! Byte stream to [`Message`]s.
//!
//! [`frame_message`] frames one message from the front of a buffer. Items are
//! framed independently: an item with an unknown code, a bad length or bad
//! field values becomes an invalid placeholder carrying its error while the
//! rest of the message is kept. Only the message header can reject a frame.
//!
//! [`MessageFramer`] keeps the partial input of one connection between reads.

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::error::{FramingError, ItemError};
use crate::item::Item;
use crate::message::{Message, MessageType, HEADER_LEN, ITEM_HEADER_LEN, TRAILER_LEN};
use crate::registry;

/// Frame one message from the start of `buf`.
///
/// Returns the message and the number of bytes it occupied.
pub fn frame_message(buf: &[u8], max_message_bytes: usize) -> Result<(Message, usize), FramingError> {
    if buf.len() < HEADER_LEN {
        return Err(FramingError::Incomplete {
            have: buf.len(),
            need: HEADER_LEN,
        });
    }
    let tag = buf[0];
    let declared = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if declared > max_message_bytes {
        return Err(FramingError::MessageTooLarge {
            declared,
            max: max_message_bytes,
        });
    }

    let total = HEADER_LEN + declared + TRAILER_LEN;
    if buf.len() < total {
        return Err(FramingError::Incomplete {
            have: buf.len(),
            need: total,
        });
    }

    let Some(kind) = MessageType::from_u8(tag) else {
        return Err(FramingError::UnknownMessageType {
            tag,
            consumed: total,
        });
    };

    let items = parse_items(&buf[HEADER_LEN..HEADER_LEN + declared]);
    let message = Message {
        kind,
        items,
        trailer: buf[total - 1],
    };
    Ok((message, total))
}

fn parse_items(mut payload: &[u8]) -> Vec<Item> {
    let mut items = Vec::new();
    let mut offset = 0usize;

    while !payload.is_empty() {
        if payload.len() < ITEM_HEADER_LEN {
            let err = ItemError::Truncated { offset };
            warn!(error = %err, "Dropping trailing bytes");
            items.push(Item::invalid(0, payload, &err));
            break;
        }
        let code = u16::from_le_bytes([payload[0], payload[1]]);
        let len = usize::from(u16::from_le_bytes([payload[2], payload[3]]));
        let body = &payload[ITEM_HEADER_LEN..];
        if body.len() < len {
            let err = ItemError::Truncated { offset };
            warn!(code, len, error = %err, "Item runs past the message");
            items.push(Item::invalid(code, body, &err));
            break;
        }

        let data = &body[..len];
        let item = match registry::construct(code, data) {
            Ok(item) => item,
            Err(err) => {
                warn!(code, len, error = %err, "Rejected item");
                Item::invalid(code, data, &err)
            }
        };
        trace!(item = %item.describe(false), "Framed item");
        items.push(item);

        payload = &body[len..];
        offset += ITEM_HEADER_LEN + len;
    }
    items
}

/// Per-connection reassembly buffer.
#[derive(Debug)]
pub struct MessageFramer {
    buf: BytesMut,
    max_message_bytes: usize,
}

impl MessageFramer {
    /// Empty framer rejecting messages above `max_message_bytes`.
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_message_bytes,
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes waiting for the rest of their message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete message, a framing error, or `None` if more input is
    /// needed.
    ///
    /// An oversized message clears the buffer; an unknown message type is
    /// skipped.
    pub fn next_message(&mut self) -> Option<Result<Message, FramingError>> {
        match frame_message(&self.buf, self.max_message_bytes) {
            Ok((message, consumed)) => {
                self.buf.advance(consumed);
                Some(Ok(message))
            }
            Err(FramingError::Incomplete { .. }) => None,
            Err(err @ FramingError::MessageTooLarge { .. }) => {
                self.buf.clear();
                Some(Err(err))
            }
            Err(err @ FramingError::UnknownMessageType { consumed, .. }) => {
                self.buf.advance(consumed);
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ItemId;
    use crate::item::ItemKind;
    use tracing_test::traced_test;

    const MAX: usize = 1 << 20;

    fn frame(tag: u8, items: &[(u16, &[u8])]) -> Vec<u8> {
        let mut payload = Vec::new();
        for (code, data) in items {
            payload.extend_from_slice(&code.to_le_bytes());
            payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
            payload.extend_from_slice(data);
        }
        let mut buf = vec![tag];
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf.push(0xAA);
        buf
    }

    #[test]
    fn test_frames_items_in_order_and_keeps_trailer() {
        let bytes = frame(
            b'Q',
            &[(0x0002, &[]), (0x1001, &[0x00, 0x30, 0x00, 0x80, 0x30])],
        );
        let (msg, used) = frame_message(&bytes, MAX).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(msg.kind, MessageType::Query);
        assert_eq!(msg.trailer, 0xAA);
        assert_eq!(msg.items.len(), 2);
        assert_eq!(msg.items[0].id(), Some(ItemId::BrdDeviceId));
        assert_eq!(
            msg.items[1].kind(),
            &ItemKind::AdcRange {
                group: 0,
                value: 0x3080_0030
            }
        );
    }

    #[test]
    #[traced_test]
    fn test_bad_items_become_placeholders() {
        let bytes = frame(
            b'C',
            &[(0x7777, &[1]), (0x1001, &[0; 4]), (0x0002, &[])],
        );
        let (msg, _) = frame_message(&bytes, MAX).unwrap();
        assert_eq!(msg.items.len(), 3);
        assert!(msg.items[0].is_failed());
        assert!(msg.items[1].is_failed());
        assert!(!msg.items[2].is_failed());
        assert!(msg.has_errors());
        assert!(logs_contain("Rejected item"));
    }

    #[test]
    fn test_truncated_item_stops_parsing() {
        let mut bytes = vec![b'Q', 6, 0, 0, 0];
        bytes.extend_from_slice(&[0x02, 0x00, 0x04, 0x00, 0xFF, 0xFF]);
        bytes.push(0);
        let (msg, _) = frame_message(&bytes, MAX).unwrap();
        assert_eq!(msg.items.len(), 1);
        assert!(matches!(
            msg.items[0].fault().map(|f| f.kind),
            Some(aiod_core::ErrorKind::Framing)
        ));
    }

    #[test]
    fn test_short_header_is_incomplete() {
        assert!(matches!(
            frame_message(&[b'Q', 0, 0], MAX),
            Err(FramingError::Incomplete { have: 3, need: 5 })
        ));
    }

    #[test]
    fn test_framer_reassembles_split_input() {
        let bytes = frame(b'Q', &[(0x0002, &[]), (0x2004, &[])]);
        let mut framer = MessageFramer::new(MAX);

        framer.extend(&bytes[..3]);
        assert!(framer.next_message().is_none());
        framer.extend(&bytes[3..bytes.len() - 1]);
        assert!(framer.next_message().is_none());
        framer.extend(&bytes[bytes.len() - 1..]);
        framer.extend(&bytes);

        assert_eq!(framer.next_message().unwrap().unwrap().items.len(), 2);
        assert_eq!(framer.next_message().unwrap().unwrap().items.len(), 2);
        assert!(framer.next_message().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_framer_skips_unknown_type_and_clears_oversized() {
        let mut framer = MessageFramer::new(16);
        framer.extend(&frame(b'Z', &[(0x0002, &[])]));
        framer.extend(&frame(b'Q', &[(0x0002, &[])]));
        assert!(matches!(
            framer.next_message(),
            Some(Err(FramingError::UnknownMessageType { tag: b'Z', .. }))
        ));
        assert!(framer.next_message().unwrap().is_ok());

        framer.extend(&frame(b'Q', &[(0x8002, &[0; 32])]));
        assert!(matches!(
            framer.next_message(),
            Some(Err(FramingError::MessageTooLarge { declared: 36, max: 16 }))
        ));
        assert_eq!(framer.buffered(), 0);
    }
}
