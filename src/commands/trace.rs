//! Trace inspection commands: list, match, rollback, reap

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

use crate::models::{CheckpointId, Rank};
use crate::process::{is_process_alive, kill_process};
use crate::trace::{correlate, read_trace_dir, rollback_plan, RollbackPlan, TraceRecord};

/// Print every record in `dir`, optionally for one rank only
pub fn list(dir: &Path, rank: Option<Rank>) -> Result<()> {
    let records = read_trace_dir(dir)?;
    let records: Vec<_> = records
        .iter()
        .filter(|r| rank.map_or(true, |rank| r.rank == rank))
        .collect();

    if records.is_empty() {
        println!("{} No trace records in {}", "─".dimmed(), dir.display());
        return Ok(());
    }

    for record in records {
        println!("{}", format_record(record));
    }
    Ok(())
}

/// Print matched send/receive pairs and calls with no counterpart
pub fn match_calls(dir: &Path) -> Result<()> {
    let records = read_trace_dir(dir)?;
    let correlation = correlate(&records);

    println!("{}", "Matched messages".bold());
    if correlation.links.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for link in &correlation.links {
        println!(
            "  {} {} {} tag={}",
            link.send.to_string().cyan(),
            "→".dimmed(),
            link.receive.to_string().cyan(),
            link.tag
        );
    }

    if !correlation.unmatched.is_empty() {
        println!();
        println!("{}", "Unmatched calls".bold());
        for id in &correlation.unmatched {
            println!("  {} {}", "?".yellow(), id);
        }
    }
    Ok(())
}

/// Print the recovery line that restores call `seq` of `rank`
pub fn rollback(dir: &Path, rank: Rank, seq: u64) -> Result<()> {
    let records = read_trace_dir(dir)?;
    let plan = rollback_plan(&records, CheckpointId::new(rank, seq))?;
    for line in format_plan(&plan) {
        println!("{line}");
    }
    Ok(())
}

/// SIGKILL every checkpoint process named in the trace that is still alive
pub fn reap(dir: &Path) -> Result<()> {
    let records = read_trace_dir(dir)?;
    let killed = reap_records(&records)?;
    if killed == 0 {
        println!("{} No live checkpoints to reap", "─".dimmed());
    } else {
        println!("{} Reaped {killed} checkpoint(s)", "✓".green().bold());
    }
    Ok(())
}

/// Kill the live checkpoint pids referenced by `records`; returns how many died.
///
/// Pids come from the log and may have been reused since it was written.
/// The launcher's own pid is never signalled.
pub fn reap_records(records: &[TraceRecord]) -> Result<usize> {
    let own = std::process::id() as i32;
    let pids: BTreeSet<i32> = records
        .iter()
        .filter_map(|r| r.checkpoint_pid)
        .filter(|pid| *pid != own && is_process_alive(*pid))
        .collect();

    let mut killed = 0;
    for pid in pids {
        if kill_process(pid).with_context(|| format!("Failed to kill checkpoint {pid}"))? {
            info!(pid, "reaped checkpoint");
            killed += 1;
        }
    }
    Ok(killed)
}

fn format_record(record: &TraceRecord) -> String {
    let checkpoint = match record.checkpoint_pid {
        Some(pid) if is_process_alive(pid) => format!("checkpoint {pid} {}", "alive".green()),
        Some(pid) => format!("checkpoint {pid} {}", "gone".dimmed()),
        None => "no checkpoint".dimmed().to_string(),
    };
    format!(
        "{:<8} {} [{}] pid {} {} {}",
        record.id().to_string(),
        record.descriptor,
        record.branch,
        record.pid,
        checkpoint,
        record.recorded_at.format("%H:%M:%S%.3f").to_string().dimmed()
    )
}

fn format_plan(plan: &RollbackPlan) -> Vec<String> {
    let mut lines = vec![format!("{} {}", "Recovery line for".bold(), plan.target)];
    for point in plan.points.values() {
        let status = match point.checkpoint_pid {
            Some(pid) => format!("resume checkpoint {pid}"),
            None => "no checkpoint parked".yellow().to_string(),
        };
        lines.push(format!("  rank {:<4} {:<8} {}", point.id.rank, point.id, status));
    }
    if !plan.is_restorable() {
        let missing: Vec<_> = plan.missing().iter().map(ToString::to_string).collect();
        lines.push(format!(
            "{} Not restorable; traced without checkpoints: {}",
            "✗".red().bold(),
            missing.join(", ")
        ));
    }
    lines
}
