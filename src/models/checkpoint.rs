use serde::{Deserialize, Serialize};
use std::fmt;

use super::descriptor::{Descriptor, Rank};

/// Identifies a checkpoint by its originating rank and per-process sequence number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointId {
    pub rank: Rank,
    pub seq: u64,
}

impl CheckpointId {
    pub fn new(rank: Rank, seq: u64) -> Self {
        Self { rank, seq }
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}#{}", self.rank, self.seq)
    }
}

/// Lifecycle of a checkpoint process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointState {
    /// Suspended on its park token, not runnable
    Parked,
    /// Woken by the controller; now an independent running process
    Resumed,
    /// Terminated without being resumed
    Reaped,
}

impl fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointState::Parked => write!(f, "parked"),
            CheckpointState::Resumed => write!(f, "resumed"),
            CheckpointState::Reaped => write!(f, "reaped"),
        }
    }
}

/// Queryable view of one checkpoint, as returned by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub id: CheckpointId,
    pub descriptor: Descriptor,
    /// OS process id of the checkpoint branch
    pub pid: i32,
    pub state: CheckpointState,
}

impl CheckpointInfo {
    pub fn is_parked(&self) -> bool {
        self.state == CheckpointState::Parked
    }
}

/// Which continuation of a rank is executing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// The original process, performing the real communication
    #[default]
    Live,
    /// A checkpoint that was woken by the controller
    Resumed { from: CheckpointId },
}

impl Branch {
    pub fn is_live(&self) -> bool {
        matches!(self, Branch::Live)
    }

    pub fn is_resumed(&self) -> bool {
        matches!(self, Branch::Resumed { .. })
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Live => write!(f, "live"),
            Branch::Resumed { from } => write!(f, "resumed({from})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_ids_order_by_rank_then_seq() {
        let mut ids = vec![
            CheckpointId::new(1, 2),
            CheckpointId::new(0, 5),
            CheckpointId::new(1, 1),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                CheckpointId::new(0, 5),
                CheckpointId::new(1, 1),
                CheckpointId::new(1, 2)
            ]
        );
    }

    #[test]
    fn test_branch_serialization() {
        let branch = Branch::Resumed {
            from: CheckpointId::new(2, 4),
        };
        let json = serde_json::to_string(&branch).unwrap();
        let back: Branch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, branch);
        assert_eq!(serde_json::to_string(&Branch::Live).unwrap(), "\"live\"");
    }
}
