use anyhow::Result;
use rankfork::commands::run::{self, RunOptions};
use rankfork::commands::trace;

use super::types::{Commands, TraceCommands};

pub fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            ranks,
            mode,
            trace_dir,
            timeout,
            program,
        } => run::execute(RunOptions {
            ranks,
            mode,
            trace_dir,
            timeout,
            program,
        }),
        Commands::Trace { command } => match command {
            TraceCommands::List { dir, rank } => trace::list(&dir, rank),
            TraceCommands::Match { dir } => trace::match_calls(&dir),
            TraceCommands::Rollback { dir, rank, seq } => trace::rollback(&dir, rank, seq),
            TraceCommands::Reap { dir } => trace::reap(&dir),
        },
    }
}
