//! CLI command implementations
//!
//! - [`run`]: launch N ranks of an instrumented program
//! - [`trace`]: inspect trace logs and the checkpoints they point at

pub mod run;
pub mod trace;
