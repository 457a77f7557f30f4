//! # aiod-core
//!
//! Foundation crate for the aiod data-acquisition daemon.
//!
//! ## Overview
//!
//! This crate owns everything that touches the board directly:
//!
//! - [`registers`]: the register map, access widths and raw sample layout
//! - [`port`]: the [`RegisterPort`] and [`DmaEngine`] seams
//! - [`sim`]: an in-memory board used by tests and the `simulated` backend
//! - [`mapped`]: a register port over an `mmap`ed register window
//!
//! Higher layers (acquisition, protocol, daemon) only ever see a [`Hardware`]
//! bundle, never a concrete backend.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use aiod_core::{registers, Hardware, RegisterPort, SimulatedBoard};
//!
//! let board = Arc::new(SimulatedBoard::new());
//! let hardware = Hardware::new(board.clone(), board);
//! hardware.registers().write(registers::OFS_DIO_OUTPUT, 0x5).unwrap();
//! assert_eq!(hardware.registers().read(registers::OFS_DIO_OUTPUT).unwrap(), 0x5);
//! ```

pub mod error;
pub mod mapped;
pub mod port;
pub mod registers;
pub mod sim;
pub mod types;

pub use error::{ErrorKind, HardwareError, HardwareResult};
pub use mapped::MappedPort;
pub use port::{DmaEngine, DmaReady, Hardware, IrqWait, NoDma, RegisterPort};
pub use sim::SimulatedBoard;
pub use types::{ConnectionId, ConnectionIds, ShutdownSignal};
