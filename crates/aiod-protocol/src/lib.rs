//! # aiod-protocol
//!
//! The compact binary protocol spoken on the aiod control port.
//!
//! A [`Message`] is a one-byte type tag, a little-endian `u32` length, a run
//! of items and a one-byte trailer. Each [`Item`] is a `u16` type code, a
//! `u16` length and a payload whose length must lie within the bounds of the
//! item's [`ItemDescriptor`] in the process-wide [`registry`].
//!
//! ```
//! use aiod_protocol::{frame_message, MessageType};
//!
//! // Query with one BRD_DeviceId item
//! let bytes = [b'Q', 4, 0, 0, 0, 0x02, 0x00, 0x00, 0x00, 0x00];
//! let (message, used) = frame_message(&bytes, 1 << 20).unwrap();
//! assert_eq!(used, bytes.len());
//! assert_eq!(message.kind, MessageType::Query);
//! assert_eq!(message.items[0].code(), 0x0002);
//! ```

pub mod context;
pub mod error;
pub mod framer;
pub mod ids;
pub mod item;
pub mod message;
pub mod registry;

pub use context::ExecContext;
pub use error::{FramingError, ItemError, ItemFault};
pub use framer::{frame_message, MessageFramer};
pub use ids::ItemId;
pub use item::{Calibration, Item, ItemKind, ItemStatus, ScanSetup, ScanView};
pub use message::{Message, MessageType};
pub use registry::{construct, lookup, validate_length, ItemDescriptor};
