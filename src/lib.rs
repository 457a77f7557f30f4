//! # aiod
//!
//! Network daemon exposing an AIO data-acquisition board to TCP clients.
//!
//! ## Crate Structure
//!
//! The protocol, the acquisition algorithms and the board seams live in the
//! workspace crates (`aiod-protocol`, `aiod-acquisition`, `aiod-core`). This
//! crate runs them as a process:
//!
//! - **`config`**: layered configuration (defaults, TOML, `AIOD_*` env, CLI)
//!   loaded with Figment.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`queue`**: the action queue and the single action thread that executes
//!   every message against the board.
//! - **`connection`**: control receivers and streaming endpoints.
//! - **`server`**: the two TCP listeners.
//! - **`daemon`**: startup and ordered shutdown.
//!
//! ```no_run
//! use aiod::{Daemon, DaemonConfig};
//!
//! let daemon = Daemon::start(DaemonConfig::default())?;
//! println!("control port on {}", daemon.control_addr());
//! daemon.shutdown();
//! # Ok::<(), aiod::DaemonError>(())
//! ```

pub mod config;
pub mod connection;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod queue;
pub mod server;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use queue::{ActionQueue, MessageExecutor, ReplySink};
