//! Recovery lines for consistent multi-rank rollback
//!
//! Restoring one rank to the checkpoint taken before call `seq` undoes that call
//! and everything after it on that rank. Any message whose send or receive is
//! undone must be undone on the other side too, otherwise the restored job would
//! see a message received but never sent, or sent but never received. The
//! propagation runs to a fixpoint.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};

use super::correlate::correlate;
use super::{live_records, TraceRecord};
use crate::models::{CheckpointId, Rank};

/// Where one rank must be restored to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackPoint {
    pub id: CheckpointId,
    /// Parked checkpoint to resume; `None` if the call was only traced
    pub checkpoint_pid: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackPlan {
    pub target: CheckpointId,
    /// Ranks that must roll back; ranks absent here keep running
    pub points: BTreeMap<Rank, RollbackPoint>,
}

impl RollbackPlan {
    /// True when every point in the line has a parked checkpoint to resume
    pub fn is_restorable(&self) -> bool {
        self.points.values().all(|p| p.checkpoint_pid.is_some())
    }

    /// Points with no parked checkpoint behind them
    pub fn missing(&self) -> Vec<CheckpointId> {
        self.points
            .values()
            .filter(|p| p.checkpoint_pid.is_none())
            .map(|p| p.id)
            .collect()
    }
}

/// Compute the recovery line that restores `target` consistently.
pub fn rollback_plan(records: &[TraceRecord], target: CheckpointId) -> Result<RollbackPlan> {
    let by_id: HashMap<CheckpointId, &TraceRecord> =
        live_records(records).map(|r| (r.id(), r)).collect();
    if !by_id.contains_key(&target) {
        bail!("No live call {target} in the trace");
    }

    let mut per_rank: BTreeMap<Rank, Vec<u64>> = BTreeMap::new();
    for record in by_id.values() {
        per_rank.entry(record.rank).or_default().push(record.seq);
    }
    for seqs in per_rank.values_mut() {
        seqs.sort_unstable();
    }

    let correlation = correlate(records);

    let mut line: BTreeMap<Rank, u64> = BTreeMap::new();
    line.insert(target.rank, target.seq);
    let mut worklist = vec![target.rank];

    while let Some(rank) = worklist.pop() {
        let Some(&cut) = line.get(&rank) else {
            continue;
        };
        let undone = per_rank
            .get(&rank)
            .into_iter()
            .flatten()
            .filter(|seq| **seq >= cut)
            .map(|seq| CheckpointId::new(rank, *seq));

        for id in undone {
            let Some(partner) = correlation.partner(id) else {
                continue;
            };
            let moves_back = line
                .get(&partner.rank)
                .map_or(true, |current| partner.seq < *current);
            if moves_back {
                line.insert(partner.rank, partner.seq);
                worklist.push(partner.rank);
            }
        }
    }

    let points = line
        .into_iter()
        .map(|(rank, seq)| {
            let id = CheckpointId::new(rank, seq);
            let checkpoint_pid = by_id.get(&id).and_then(|r| r.checkpoint_pid);
            (rank, RollbackPoint { id, checkpoint_pid })
        })
        .collect();

    Ok(RollbackPlan { target, points })
}
