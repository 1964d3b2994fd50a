//! Error taxonomy for the instrumentation layer
//!
//! Three failure classes are kept apart so operators can tell them apart:
//! - [`TransportError`]: the wrapped primitive itself failed. Passed through unchanged.
//! - [`CaptureError`]: a checkpoint could not be created. The real call never ran.
//! - [`ControlError`]: a controller operation targeted an unusable checkpoint.

use std::io;
use thiserror::Error;

use crate::models::{CheckpointId, Datatype, Rank};

/// Failures of the wrapped message-passing primitives.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is not initialized")]
    NotInitialized,

    #[error("transport is already initialized")]
    AlreadyInitialized,

    #[error("transport environment is incomplete: {0}")]
    Environment(String),

    #[error("invalid rank {rank} for a group of size {size}")]
    InvalidRank { rank: Rank, size: u32 },

    #[error("unknown communicator {0}")]
    InvalidComm(u32),

    #[error("datatype mismatch: sent {sent:?}, receive buffer expects {expected:?}")]
    TypeMismatch { sent: Datatype, expected: Datatype },

    #[error("message of {incoming} elements truncated by a receive buffer of {capacity}")]
    Truncated { incoming: usize, capacity: usize },

    #[error("malformed message: {0}")]
    Protocol(String),

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checkpoint creation failures. Fatal to the instrumented call.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to create the park token channel: {0}")]
    Channel(#[source] nix::Error),

    #[error("failed to duplicate the process: {0}")]
    Fork(#[source] nix::Error),

    #[error("checkpoint {0} exited before reaching its park point")]
    ParkHandshake(CheckpointId),

    #[error("checkpoint handshake I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Controller operations on a checkpoint that cannot honor them.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("unknown checkpoint {0}")]
    Unknown(CheckpointId),

    #[error("checkpoint {0} was already resumed")]
    AlreadyResumed(CheckpointId),

    #[error("checkpoint {0} was already reaped")]
    AlreadyReaped(CheckpointId),

    #[error("checkpoint {0} is still parked")]
    StillParked(CheckpointId),

    #[error("checkpoint {0} cannot resume while the live branch still holds the rank's transport")]
    LiveTransportActive(CheckpointId),

    #[error("failed to signal checkpoint {id}: {source}")]
    Signal {
        id: CheckpointId,
        #[source]
        source: nix::Error,
    },

    #[error("failed to wake checkpoint {id}: {source}")]
    Wake {
        id: CheckpointId,
        #[source]
        source: io::Error,
    },
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown operating mode '{0}' (expected trace-only, checkpoint or rank-only)")]
    UnknownMode(String),

    #[error("invalid TOML in config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("checkpoint mode requires a fork-safe transport")]
    TransportNotForkSafe,

    #[error("IO error reading config: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error returned by [`crate::session::Session`] operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("checkpoint coverage lost: {0}")]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// True when the wrapped primitive failed, as opposed to the instrumentation.
    pub fn is_primitive_failure(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
