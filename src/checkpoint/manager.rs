use nix::unistd::{fork, ForkResult};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::debug;

use super::park::{ParkChannel, WakeToken};
use crate::error::CaptureError;
use crate::models::{CheckpointId, CheckpointInfo, CheckpointState, Descriptor, Rank};

/// Which side of the duplication returned from [`CheckpointManager::capture_and_park`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// The live branch; the checkpoint described here is parked
    Live(CheckpointInfo),
    /// This is the checkpoint branch, woken by its controller
    Resumed(CheckpointId),
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) info: CheckpointInfo,
    /// Present while parked; consumed by resume, dropped by reap
    pub(crate) token: Option<WakeToken>,
}

/// Checkpoints created by this process, keyed by sequence number.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub(crate) entries: BTreeMap<u64, Entry>,
}

impl Registry {
    /// Forget every entry without signalling anything.
    ///
    /// Runs in a freshly forked checkpoint: the inherited entries are the live
    /// branch's children, not ours, and their wake pipes must be closed here so
    /// they still see end-of-file when the live branch goes away.
    fn abandon(&mut self) {
        self.entries.clear();
    }
}

/// Process duplication primitive used by [`CheckpointManager::capture_and_park`]
pub(crate) type ForkFn = fn() -> nix::Result<ForkResult>;

fn os_fork() -> nix::Result<ForkResult> {
    // SAFETY: the child only touches its own copy of the manager and the park
    // channel before blocking in the park loop
    unsafe { fork() }
}

/// Creates a parked duplicate of the process before each blocking call.
#[derive(Debug)]
pub struct CheckpointManager {
    rank: Rank,
    pub(crate) registry: Registry,
    pub(crate) fork_fn: ForkFn,
}

impl CheckpointManager {
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            registry: Registry::default(),
            fork_fn: os_fork,
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Duplicate the process and park the copy.
    ///
    /// Returns twice: once in the live branch with [`Capture::Live`] as soon as the
    /// copy is parked, and once more in the copy with [`Capture::Resumed`] if a
    /// controller ever wakes it. Any failure leaves no checkpoint behind and must
    /// stop the instrumented call.
    pub fn capture_and_park(
        &mut self,
        id: CheckpointId,
        descriptor: &Descriptor,
    ) -> Result<Capture, CaptureError> {
        let channel = ParkChannel::open()?;

        // Unflushed output would otherwise be written once per branch
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();

        match (self.fork_fn)().map_err(CaptureError::Fork)? {
            ForkResult::Child => {
                let parked = channel.into_parked_side();
                self.registry.abandon();
                parked.park(id);
                Ok(Capture::Resumed(id))
            }
            ForkResult::Parent { child } => {
                let live = channel.into_live_side();
                let token = match live.await_parked(id, child) {
                    Ok(token) => token,
                    Err(e) => {
                        super::controller::kill_and_wait(child);
                        return Err(e);
                    }
                };

                let info = CheckpointInfo {
                    id,
                    descriptor: *descriptor,
                    pid: child.as_raw(),
                    state: CheckpointState::Parked,
                };
                debug!(checkpoint = %id, pid = info.pid, call = %descriptor, "checkpoint parked");
                self.registry.entries.insert(
                    id.seq,
                    Entry {
                        info: info.clone(),
                        token: Some(token),
                    },
                );
                Ok(Capture::Live(info))
            }
        }
    }

    /// Number of checkpoints currently parked
    pub fn parked_count(&self) -> usize {
        self.registry
            .entries
            .values()
            .filter(|e| e.info.is_parked())
            .count()
    }
}
