use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::{info, warn};

use super::manager::{CheckpointManager, Entry};
use crate::error::ControlError;
use crate::models::{CheckpointId, CheckpointInfo, CheckpointState, Rank};

/// Controller view over the checkpoints a [`CheckpointManager`] created.
///
/// Only the process that created a checkpoint can resume or reap it, since only
/// it holds the wake pipe and is the parent that collects the exit status.
///
/// A resumed checkpoint takes over its rank's transport endpoint. While the
/// live branch still holds that endpoint, resuming would divert the live
/// branch's traffic, so [`Controller::resume`] refuses until the live
/// transport is finalized.
pub struct Controller<'a> {
    manager: &'a mut CheckpointManager,
    /// The live branch's transport is still initialized
    live_transport: bool,
}

impl<'a> Controller<'a> {
    /// Controller for a manager whose live branch no longer uses its transport.
    pub fn new(manager: &'a mut CheckpointManager) -> Self {
        Self {
            manager,
            live_transport: false,
        }
    }

    /// Controller that refuses to resume while `live_transport` is true.
    pub(crate) fn with_live_transport(manager: &'a mut CheckpointManager, live_transport: bool) -> Self {
        Self {
            manager,
            live_transport,
        }
    }

    /// Parked checkpoints of `rank`, in call order.
    ///
    /// Empty for any rank other than this process's own: checkpoints of other
    /// ranks belong to the controllers inside those ranks.
    pub fn list_parked(&self, rank: Rank) -> Vec<CheckpointInfo> {
        if rank != self.manager.rank() {
            return Vec::new();
        }
        self.manager
            .registry
            .entries
            .values()
            .filter(|e| e.info.is_parked())
            .map(|e| e.info.clone())
            .collect()
    }

    /// Every checkpoint this process created, whatever its state
    pub fn list(&self) -> Vec<CheckpointInfo> {
        self.manager
            .registry
            .entries
            .values()
            .map(|e| e.info.clone())
            .collect()
    }

    /// Checkpoint `id`, if this process created it
    pub fn get(&self, id: CheckpointId) -> Option<&CheckpointInfo> {
        self.lookup(id).map(|e| &e.info)
    }

    fn lookup(&self, id: CheckpointId) -> Option<&Entry> {
        if id.rank != self.manager.rank() {
            return None;
        }
        self.manager.registry.entries.get(&id.seq)
    }

    fn lookup_mut(&mut self, id: CheckpointId) -> Result<&mut Entry, ControlError> {
        if id.rank != self.manager.rank() {
            return Err(ControlError::Unknown(id));
        }
        self.manager
            .registry
            .entries
            .get_mut(&id.seq)
            .ok_or(ControlError::Unknown(id))
    }

    /// Wake a parked checkpoint; it continues its blocked call as an
    /// independent process.
    ///
    /// # Arguments
    /// * `id` - A checkpoint created by this process
    ///
    /// # Returns
    /// * `Ok(info)` - The checkpoint is running; collect it later with [`Controller::wait`]
    /// * `Err(Unknown | AlreadyResumed | AlreadyReaped)` - Not a parked checkpoint of this rank
    /// * `Err(LiveTransportActive)` - The live branch has not finalized its transport yet;
    ///   the checkpoint stays parked
    /// * `Err(Wake)` - The checkpoint died while parked; it has been collected
    pub fn resume(&mut self, id: CheckpointId) -> Result<CheckpointInfo, ControlError> {
        let live_transport = self.live_transport;
        let entry = self.lookup_mut(id)?;
        ensure_parked(entry, id)?;
        if live_transport {
            return Err(ControlError::LiveTransportActive(id));
        }

        let token = entry.token.take().ok_or(ControlError::AlreadyResumed(id))?;
        if let Err(source) = token.wake() {
            // The checkpoint is gone (killed from outside); collect it
            let pid = Pid::from_raw(entry.info.pid);
            warn!(checkpoint = %id, pid = pid.as_raw(), error = %source, "checkpoint gone before wake");
            kill_and_wait(pid);
            entry.info.state = CheckpointState::Reaped;
            return Err(ControlError::Wake { id, source });
        }

        entry.info.state = CheckpointState::Resumed;
        info!(checkpoint = %id, pid = entry.info.pid, "checkpoint resumed");
        Ok(entry.info.clone())
    }

    /// Terminate a parked checkpoint and collect its process entry.
    ///
    /// SIGKILL cannot be blocked, so this works on a checkpoint parked with
    /// every signal masked. Safe to call after the live transport is finalized.
    ///
    /// # Returns
    /// * `Ok(())` - The process is gone and its exit status collected
    /// * `Err(Unknown | AlreadyResumed | AlreadyReaped)` - Not a parked checkpoint of this rank
    /// * `Err(Signal)` - The kernel refused the signal
    pub fn reap(&mut self, id: CheckpointId) -> Result<(), ControlError> {
        let entry = self.lookup_mut(id)?;
        ensure_parked(entry, id)?;

        let pid = Pid::from_raw(entry.info.pid);
        match kill(pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(source) => return Err(ControlError::Signal { id, source }),
        }
        wait_for(pid);

        entry.token = None;
        entry.info.state = CheckpointState::Reaped;
        info!(checkpoint = %id, pid = pid.as_raw(), "checkpoint reaped");
        Ok(())
    }

    /// Reap every parked checkpoint, returning how many were reaped.
    ///
    /// Stops at the first checkpoint that cannot be signalled; those already
    /// reaped stay reaped.
    pub fn reap_all(&mut self) -> Result<usize, ControlError> {
        let parked: Vec<CheckpointId> = self
            .list_parked(self.manager.rank())
            .into_iter()
            .map(|info| info.id)
            .collect();
        for id in &parked {
            self.reap(*id)?;
        }
        Ok(parked.len())
    }

    /// Block until a resumed checkpoint exits and return how it ended.
    ///
    /// Fails with `StillParked` or `AlreadyReaped` when the checkpoint was
    /// never resumed.
    pub fn wait(&mut self, id: CheckpointId) -> Result<WaitStatus, ControlError> {
        let entry = self.lookup_mut(id)?;
        match entry.info.state {
            CheckpointState::Parked => Err(ControlError::StillParked(id)),
            CheckpointState::Reaped => Err(ControlError::AlreadyReaped(id)),
            CheckpointState::Resumed => {
                let pid = Pid::from_raw(entry.info.pid);
                loop {
                    match waitpid(pid, None) {
                        Err(Errno::EINTR) => continue,
                        Err(source) => return Err(ControlError::Signal { id, source }),
                        Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                            return Ok(status)
                        }
                        Ok(_) => continue,
                    }
                }
            }
        }
    }
}

fn ensure_parked(entry: &Entry, id: CheckpointId) -> Result<(), ControlError> {
    match entry.info.state {
        CheckpointState::Parked => Ok(()),
        CheckpointState::Resumed => Err(ControlError::AlreadyResumed(id)),
        CheckpointState::Reaped => Err(ControlError::AlreadyReaped(id)),
    }
}

/// Collect a child's exit status, retrying on EINTR.
fn wait_for(pid: Pid) {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return,
            Err(e) => {
                warn!(pid = pid.as_raw(), error = %e, "waitpid failed");
                return;
            }
            Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => return,
            Ok(_) => continue,
        }
    }
}

pub(crate) fn kill_and_wait(pid: Pid) {
    let _ = kill(pid, Signal::SIGKILL);
    wait_for(pid);
}
