//! Checkpoint creation and control
//!
//! This module provides:
//! - [`CheckpointManager`]: fork-and-park before a blocking call
//! - [`Controller`]: list, resume, reap and wait on parked checkpoints
//! - the park/unpark token handshake between the two branches
//!
//! Every parked checkpoint is a whole process. A long-running program in
//! checkpoint mode accumulates one per send/receive until the controller reaps
//! or resumes them; this is the price of being able to return to any call.

mod controller;
mod manager;
mod park;

pub use controller::Controller;
pub use manager::{Capture, CheckpointManager};
pub use park::{WakeToken, ORPHAN_EXIT_CODE};
