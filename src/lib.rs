//! Fork-and-park checkpointing for rank-based message-passing programs.
//!
//! Wrap a [`Transport`] in a [`Session`] and call its primitives instead of the
//! transport's. In checkpoint mode every blocking send and receive first forks a
//! copy of the process and parks it, so any call can later be re-entered from
//! its pre-call state through the [`checkpoint::Controller`].

pub mod checkpoint;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod process;
pub mod recorder;
pub mod session;
pub mod trace;
pub mod transport;
pub mod validation;

pub use config::{InstrumentConfig, Mode};
pub use error::{Error, Result};
pub use session::Session;
pub use transport::{MemoryTransport, MemoryWorld, SocketTransport, Transport};
