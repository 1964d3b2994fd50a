//! Park/unpark handshake between a checkpoint branch and its controller
//!
//! Two pipes are created before the fork:
//! - the *ready* pipe, written once by the checkpoint after it has masked signals,
//!   so the live branch only continues once the checkpoint is actually parked;
//! - the *wake* pipe, on which the checkpoint blocks until the controller writes
//!   the token carrying this checkpoint's id.
//!
//! The parked branch blocks in `read(2)` with every maskable signal blocked, so it
//! is not runnable and nothing but its own token (or SIGKILL) moves it.

use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow};
use nix::unistd::{pipe, Pid};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;

use crate::error::CaptureError;
use crate::models::CheckpointId;

/// Exit code of a parked checkpoint whose controller went away
pub const ORPHAN_EXIT_CODE: i32 = 75;

const TOKEN_MAGIC: [u8; 2] = *b"RF";
const TOKEN_LEN: usize = 2 + 4 + 8;
const READY_BYTE: u8 = 0x01;

fn token_bytes(id: CheckpointId) -> [u8; TOKEN_LEN] {
    let mut token = [0u8; TOKEN_LEN];
    token[..2].copy_from_slice(&TOKEN_MAGIC);
    token[2..6].copy_from_slice(&id.rank.to_le_bytes());
    token[6..].copy_from_slice(&id.seq.to_le_bytes());
    token
}

/// Pipe ends created before the fork; split between the two branches after it.
pub(crate) struct ParkChannel {
    wake_rx: OwnedFd,
    wake_tx: OwnedFd,
    ready_rx: OwnedFd,
    ready_tx: OwnedFd,
}

impl ParkChannel {
    pub(crate) fn open() -> Result<Self, CaptureError> {
        let (wake_rx, wake_tx) = pipe().map_err(CaptureError::Channel)?;
        let (ready_rx, ready_tx) = pipe().map_err(CaptureError::Channel)?;
        Ok(Self {
            wake_rx,
            wake_tx,
            ready_rx,
            ready_tx,
        })
    }

    /// Keep the ends the checkpoint branch needs, closing the others
    pub(crate) fn into_parked_side(self) -> ParkedSide {
        drop(self.wake_tx);
        drop(self.ready_rx);
        ParkedSide {
            wake: File::from(self.wake_rx),
            ready: File::from(self.ready_tx),
        }
    }

    /// Keep the ends the live branch needs, closing the others
    pub(crate) fn into_live_side(self) -> LiveSide {
        drop(self.wake_rx);
        drop(self.ready_tx);
        LiveSide {
            wake: File::from(self.wake_tx),
            ready: File::from(self.ready_rx),
        }
    }
}

pub(crate) struct ParkedSide {
    wake: File,
    ready: File,
}

impl ParkedSide {
    /// Suspend until this checkpoint's token arrives.
    ///
    /// Returns only on a valid wake-up. If the controller side of the pipe is
    /// closed the checkpoint can never be resumed, so the process exits with
    /// [`ORPHAN_EXIT_CODE`] without running any destructors.
    pub(crate) fn park(self, id: CheckpointId) {
        let ParkedSide { mut wake, mut ready } = self;

        let mut previous = SigSet::empty();
        if pthread_sigmask(
            SigmaskHow::SIG_SETMASK,
            Some(&SigSet::all()),
            Some(&mut previous),
        )
        .is_err()
        {
            exit_orphaned();
        }

        if ready.write_all(&[READY_BYTE]).is_err() {
            exit_orphaned();
        }
        drop(ready);

        let expected = token_bytes(id);
        let mut received = [0u8; TOKEN_LEN];
        loop {
            match wake.read_exact(&mut received) {
                Ok(()) if received == expected => break,
                // A token for some other checkpoint never wakes this one
                Ok(()) => continue,
                Err(_) => exit_orphaned(),
            }
        }
        drop(wake);

        let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous), None);
    }
}

fn exit_orphaned() -> ! {
    // _exit skips atexit handlers and stdio flushing inherited from the live branch
    unsafe { libc::_exit(ORPHAN_EXIT_CODE) }
}

pub(crate) struct LiveSide {
    wake: File,
    ready: File,
}

impl LiveSide {
    /// Block until the checkpoint reports it is parked.
    pub(crate) fn await_parked(self, id: CheckpointId, pid: Pid) -> Result<WakeToken, CaptureError> {
        let LiveSide { wake, mut ready } = self;
        let mut byte = [0u8; 1];
        match ready.read_exact(&mut byte) {
            Ok(()) if byte[0] == READY_BYTE => Ok(WakeToken { id, pid, wake }),
            Ok(()) => Err(CaptureError::ParkHandshake(id)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(CaptureError::ParkHandshake(id))
            }
            Err(e) => Err(CaptureError::Io(e)),
        }
    }
}

/// Controller-side handle able to wake exactly one parked checkpoint.
///
/// Dropping it without waking closes the pipe, which makes the parked
/// checkpoint exit as an orphan.
#[derive(Debug)]
pub struct WakeToken {
    id: CheckpointId,
    pid: Pid,
    wake: File,
}

impl WakeToken {
    pub fn id(&self) -> CheckpointId {
        self.id
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Deliver the token; the checkpoint resumes at its park point.
    pub fn wake(mut self) -> io::Result<()> {
        self.wake.write_all(&token_bytes(self.id))?;
        self.wake.flush()
    }
}
