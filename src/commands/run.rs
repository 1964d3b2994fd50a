//! Launcher: start every rank of a job and wait for them

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::config::{Mode, MODE_ENV, TRACE_DIR_ENV};
use crate::models::Rank;
use crate::process::kill_process;
use crate::transport::socket::{DIR_ENV, RANK_ENV, SIZE_ENV};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub ranks: u32,
    /// Left to each rank's own configuration when unset
    pub mode: Option<Mode>,
    pub trace_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Program followed by its arguments
    pub program: Vec<String>,
}

/// How one rank ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankExit {
    Exited(ExitStatus),
    /// Killed by the launcher when the job outlived its timeout
    TimedOut,
}

impl RankExit {
    pub fn success(&self) -> bool {
        matches!(self, RankExit::Exited(status) if status.success())
    }
}

/// Pids of running ranks, shared with the Ctrl-C handler
type RankPids = Arc<Mutex<Vec<i32>>>;

/// Execute the run command: launch, wait, report.
pub fn execute(options: RunOptions) -> Result<()> {
    let pids: RankPids = Arc::default();

    let handler_pids = Arc::clone(&pids);
    if let Err(e) = ctrlc::set_handler(move || {
        if let Ok(pids) = handler_pids.lock() {
            for pid in pids.iter() {
                let _ = kill_process(*pid);
            }
        }
    }) {
        warn!(error = %e, "Ctrl-C will not be forwarded to ranks");
    }

    println!(
        "{} Launching {} rank(s): {}",
        "→".cyan().bold(),
        options.ranks,
        options.program.join(" ")
    );
    let exits = launch(&options, &pids)?;

    let mut failed = 0;
    for (rank, exit) in exits.iter().enumerate() {
        if !exit.success() {
            failed += 1;
        }
        println!("{}", describe_exit(rank as Rank, exit));
    }

    if failed > 0 {
        bail!("{failed} of {} rank(s) failed", exits.len());
    }
    println!("{} All ranks completed", "✓".green().bold());
    Ok(())
}

/// Spawn every rank and wait for all of them.
///
/// Ranks rendezvous in a fresh temporary directory that is removed once they
/// have all ended. Pids are published to `pids` while the ranks run.
pub fn launch(options: &RunOptions, pids: &RankPids) -> Result<Vec<RankExit>> {
    if options.ranks == 0 {
        bail!("At least one rank is required");
    }
    let Some((program, args)) = options.program.split_first() else {
        bail!("No program given to launch");
    };

    let rendezvous = tempfile::Builder::new()
        .prefix("rankfork-")
        .tempdir()
        .context("Failed to create rendezvous directory")?;

    let mut children = Vec::with_capacity(options.ranks as usize);
    for rank in 0..options.ranks {
        let mut command = Command::new(program);
        command
            .args(args)
            .env(RANK_ENV, rank.to_string())
            .env(SIZE_ENV, options.ranks.to_string())
            .env(DIR_ENV, rendezvous.path());
        if let Some(mode) = options.mode {
            command.env(MODE_ENV, mode.to_string());
        }
        if let Some(dir) = &options.trace_dir {
            command.env(TRACE_DIR_ENV, dir);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                kill_all(&mut children);
                return Err(e).with_context(|| format!("Failed to spawn rank {rank}: {program}"));
            }
        };
        debug!(rank, pid = child.id(), "rank started");
        if let Ok(mut pids) = pids.lock() {
            pids.push(child.id() as i32);
        }
        children.push(child);
    }

    let exits = wait_all(&mut children, options.timeout);
    if let Ok(mut pids) = pids.lock() {
        pids.clear();
    }
    exits
}

fn wait_all(children: &mut [Child], timeout: Option<Duration>) -> Result<Vec<RankExit>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut exits = Vec::with_capacity(children.len());

    for (rank, child) in children.iter_mut().enumerate() {
        let status = match deadline {
            None => Some(
                child
                    .wait()
                    .with_context(|| format!("Failed to wait for rank {rank}"))?,
            ),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                child
                    .wait_timeout(remaining)
                    .with_context(|| format!("Failed to wait for rank {rank}"))?
            }
        };

        match status {
            Some(status) => exits.push(RankExit::Exited(status)),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                exits.push(RankExit::TimedOut);
            }
        }
    }
    Ok(exits)
}

fn kill_all(children: &mut [Child]) {
    for child in children {
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn describe_exit(rank: Rank, exit: &RankExit) -> String {
    match exit {
        RankExit::Exited(status) if status.success() => {
            format!("  {} rank {rank} exited 0", "✓".green())
        }
        RankExit::Exited(status) => match (status.code(), status.signal()) {
            (Some(code), _) => format!("  {} rank {rank} exited {code}", "✗".red()),
            (None, Some(signal)) => {
                format!("  {} rank {rank} killed by signal {signal}", "✗".red())
            }
            (None, None) => format!("  {} rank {rank} ended abnormally", "✗".red()),
        },
        RankExit::TimedOut => format!("  {} rank {rank} timed out", "⏱".yellow()),
    }
}
