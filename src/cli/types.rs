use clap::{Parser, Subcommand};
use rankfork::config::Mode;
use rankfork::validation::{
    clap_mode_validator, clap_rank_count_validator, clap_timeout_validator,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rankfork")]
#[command(about = "Fork-and-park checkpointing for message-passing programs", long_about = None)]
#[command(version)]
#[command(subcommand_help_heading = "Commands")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch N ranks of an instrumented program
    Run {
        /// Number of ranks to start
        #[arg(short = 'n', long = "ranks", value_parser = clap_rank_count_validator)]
        ranks: u32,

        /// Operating mode for every rank: trace-only, checkpoint, rank-only
        #[arg(long, value_parser = clap_mode_validator)]
        mode: Option<Mode>,

        /// Directory receiving one trace file per rank
        #[arg(long)]
        trace_dir: Option<PathBuf>,

        /// Kill ranks still running after this many seconds
        #[arg(long, value_parser = clap_timeout_validator)]
        timeout: Option<Duration>,

        /// Program and its arguments
        #[arg(last = true, required = true, num_args = 1..)]
        program: Vec<String>,
    },

    /// Inspect trace logs and the checkpoints they reference
    Trace {
        #[command(subcommand)]
        command: TraceCommands,
    },
}

#[derive(Subcommand)]
pub enum TraceCommands {
    /// Print recorded calls, marking checkpoint processes alive or gone
    List {
        /// Trace directory
        #[arg(long)]
        dir: PathBuf,

        /// Only show this rank
        #[arg(long)]
        rank: Option<u32>,
    },

    /// Pair sends with the receives that consumed them
    Match {
        #[arg(long)]
        dir: PathBuf,
    },

    /// Compute the recovery line for restoring one call
    Rollback {
        #[arg(long)]
        dir: PathBuf,

        /// Rank of the call to restore
        #[arg(long)]
        rank: u32,

        /// Sequence number of the call to restore
        #[arg(long)]
        seq: u64,
    },

    /// Kill checkpoint processes from the log that are still alive
    Reap {
        #[arg(long)]
        dir: PathBuf,
    },
}
