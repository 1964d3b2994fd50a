//! Fork-based checkpoint tests over the Unix-socket transport.
//!
//! Every test forks real processes, so they run serially. Code that may run in
//! a forked branch never unwinds: it leaves through `libc::_exit`.

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use rankfork::error::{ControlError, Error};
use rankfork::models::{CheckpointId, Comm, OpKind, Peer, Tag};
use rankfork::process::is_process_alive;
use rankfork::trace::read_trace_dir;
use rankfork::{InstrumentConfig, Mode, Session, SocketTransport};
use serial_test::serial;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn exit_now(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

/// Run `body` in a forked child and return its pid; the child exits with the
/// closure's return value, or 101 if it panicked.
fn spawn_process(body: impl FnOnce() -> i32) -> Pid {
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)).unwrap_or(101);
            exit_now(code)
        }
        ForkResult::Parent { child } => child,
    }
}

fn exit_code(pid: Pid) -> i32 {
    match waitpid(pid, None).unwrap() {
        WaitStatus::Exited(_, code) => code,
        other => panic!("unexpected wait status {other:?}"),
    }
}

fn session(rank: u32, size: u32, dir: &Path, mode: Mode) -> Session<SocketTransport> {
    let transport = SocketTransport::new(rank, size, dir).unwrap();
    Session::initialize(InstrumentConfig::new(mode), transport).unwrap()
}

/// A plain rank that sends `values` to rank 1 in one message and exits.
fn spawn_sender(dir: &Path, values: Vec<i32>) -> Pid {
    let dir = dir.to_path_buf();
    spawn_process(move || {
        let mut s = session(0, 2, &dir, Mode::RankOnly);
        s.send(&values, 1, 0, Comm::WORLD).unwrap();
        s.finalize().unwrap();
        0
    })
}

/// Ring over three rank processes: each passes a token to the next, adding
/// its rank. Returns every rank's final token.
fn run_socket_ring(mode: Mode) -> Vec<i32> {
    let size = 3;
    let rendezvous = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let ranks: Vec<Pid> = (0..size)
        .map(|rank| {
            let dir = rendezvous.path().to_path_buf();
            let result = out.path().join(format!("rank-{rank}"));
            spawn_process(move || {
                let mut s = session(rank, size, &dir, mode);
                let next = (rank + 1) % size;
                let prev = (rank + size - 1) % size;
                let mut token = [0i32];
                if rank == 0 {
                    s.send(&[100i32], next, 0, Comm::WORLD).unwrap();
                    s.receive(&mut token, prev, 0, Comm::WORLD).unwrap();
                } else {
                    s.receive(&mut token, prev, 0, Comm::WORLD).unwrap();
                    token[0] += rank as i32;
                    s.send(&token, next, 0, Comm::WORLD).unwrap();
                }
                if s.branch().is_resumed() {
                    return 1;
                }

                let expected = if mode == Mode::Checkpoint { 2 } else { 0 };
                if s.controller().reap_all().unwrap() != expected {
                    return 2;
                }
                s.finalize().unwrap();
                fs::write(&result, token[0].to_string()).unwrap();
                0
            })
        })
        .collect();

    for pid in ranks {
        assert_eq!(exit_code(pid), 0);
    }
    (0..size)
        .map(|rank| {
            fs::read_to_string(out.path().join(format!("rank-{rank}")))
                .unwrap()
                .parse()
                .unwrap()
        })
        .collect()
}

#[test]
#[serial]
fn test_checkpointed_ring_matches_plain_ring() {
    let checkpointed = run_socket_ring(Mode::Checkpoint);
    let plain = run_socket_ring(Mode::RankOnly);
    assert_eq!(checkpointed, plain);
    assert_eq!(checkpointed, vec![103, 101, 103]);
}

#[test]
#[serial]
fn test_resumed_receive_consumes_replayed_message() {
    let rendezvous = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let result_path = out.path().join("resumed");

    let sender = spawn_sender(rendezvous.path(), vec![123]);

    let mut s = session(1, 2, rendezvous.path(), Mode::Checkpoint);
    let mut buf = [0i32];
    let received = s.receive(&mut buf, 0u32, 0, Comm::WORLD);

    if s.branch().is_resumed() {
        // Checkpoint branch: buffer was captured before the first delivery
        let code = match received {
            Ok(status) if status.source == 0 && status.tag == 0 => {
                let _ = fs::write(&result_path, buf[0].to_string());
                0
            }
            _ => 1,
        };
        exit_now(code);
    }

    let status = received.unwrap();
    assert_eq!(buf[0], 123);
    assert_eq!(status.count, 1);
    assert_eq!(exit_code(sender), 0);

    let id = CheckpointId::new(1, 1);
    let parked = s.controller().list_parked(1);
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].id, id);
    assert_eq!(parked[0].descriptor, *s.recorder().current().unwrap());
    assert_eq!(parked[0].descriptor.op, OpKind::Receive);
    assert!(is_process_alive(parked[0].pid));

    // The live branch is done with its socket; the checkpoint takes it over
    s.finalize().unwrap();
    s.controller().resume(id).unwrap();

    let replay = spawn_sender(rendezvous.path(), vec![123]);
    assert_eq!(exit_code(replay), 0);

    let status = s.controller().wait(id).unwrap();
    assert!(matches!(status, WaitStatus::Exited(_, 0)));
    // Same buffer content as the live run
    assert_eq!(fs::read_to_string(&result_path).unwrap(), buf[0].to_string());
}

#[test]
#[serial]
fn test_checkpoints_can_be_reaped_and_resumed_in_any_order() {
    let rendezvous = TempDir::new().unwrap();
    let mut s = session(0, 1, rendezvous.path(), Mode::Checkpoint);

    for tag in 1..=5 {
        let sent = s.send(&[tag], 0, tag, Comm::WORLD);
        if s.branch().is_resumed() {
            exit_now(if sent.is_ok() { 40 + tag } else { 1 });
        }
        sent.unwrap();
    }
    for tag in 1..=5 {
        let mut buf = [0i32];
        let received = s.receive(&mut buf, Peer::Rank(0), Tag::Value(tag), Comm::WORLD);
        if s.branch().is_resumed() {
            exit_now(2);
        }
        received.unwrap();
        assert_eq!(buf[0], tag);
    }

    let ids: Vec<u64> = s
        .controller()
        .list_parked(0)
        .iter()
        .map(|info| info.id.seq)
        .collect();
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    let third = s.controller().get(CheckpointId::new(0, 3)).unwrap().descriptor;
    assert_eq!(third.op, OpKind::Send);
    assert_eq!(third.tag, Tag::Value(3));

    // Resumed checkpoints take over the rank's socket
    s.finalize().unwrap();
    let mut controller = s.controller();
    assert!(matches!(
        controller.wait(CheckpointId::new(0, 1)),
        Err(ControlError::StillParked(_))
    ));
    assert!(matches!(
        controller.resume(CheckpointId::new(0, 99)),
        Err(ControlError::Unknown(_))
    ));
    assert!(matches!(
        controller.reap(CheckpointId::new(3, 1)),
        Err(ControlError::Unknown(_))
    ));

    controller.reap(CheckpointId::new(0, 3)).unwrap();
    let reaped_pid = controller.get(CheckpointId::new(0, 3)).unwrap().pid;
    assert!(!is_process_alive(reaped_pid));

    let fifth = CheckpointId::new(0, 5);
    controller.resume(fifth).unwrap();
    assert!(matches!(controller.wait(fifth).unwrap(), WaitStatus::Exited(_, 45)));

    assert!(matches!(
        controller.resume(CheckpointId::new(0, 3)),
        Err(ControlError::AlreadyReaped(_))
    ));
    assert!(matches!(
        controller.reap(fifth),
        Err(ControlError::AlreadyResumed(_))
    ));

    assert_eq!(controller.reap_all().unwrap(), 8);
    assert!(controller.list_parked(0).is_empty());
    assert_eq!(controller.list().len(), 10);
}

#[test]
#[serial]
fn test_resumed_branch_starts_from_the_pre_receipt_buffer() {
    let rendezvous = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let result_path = out.path().join("resumed");

    let sender = spawn_sender(rendezvous.path(), vec![123]);

    let mut s = session(1, 2, rendezvous.path(), Mode::Checkpoint);
    let mut buf = [-1i32];
    let received = s.receive(&mut buf, 0u32, 0, Comm::WORLD);

    if s.branch().is_resumed() {
        // An empty replay leaves the buffer exactly as the checkpoint saw it
        let code = match received {
            Ok(status) if status.count == 0 => {
                let _ = fs::write(&result_path, buf[0].to_string());
                0
            }
            _ => 1,
        };
        exit_now(code);
    }

    received.unwrap();
    assert_eq!(buf[0], 123);
    assert_eq!(exit_code(sender), 0);

    let id = CheckpointId::new(1, 1);
    s.finalize().unwrap();
    s.controller().resume(id).unwrap();

    let replay = spawn_sender(rendezvous.path(), Vec::new());
    assert_eq!(exit_code(replay), 0);

    assert!(matches!(s.controller().wait(id).unwrap(), WaitStatus::Exited(_, 0)));
    assert_eq!(fs::read_to_string(&result_path).unwrap(), "-1");
}

#[test]
#[serial]
fn test_resume_is_refused_while_the_live_branch_holds_the_transport() {
    let rendezvous = TempDir::new().unwrap();
    let first = spawn_sender(rendezvous.path(), vec![1]);

    let mut s = session(1, 2, rendezvous.path(), Mode::Checkpoint);
    let mut buf = [0i32];
    let received = s.receive(&mut buf, 0u32, 0, Comm::WORLD);
    if s.branch().is_resumed() {
        exit_now(1);
    }
    received.unwrap();
    assert_eq!(exit_code(first), 0);

    let id = CheckpointId::new(1, 1);
    assert!(matches!(
        s.controller().resume(id),
        Err(ControlError::LiveTransportActive(refused)) if refused == id
    ));
    assert!(s.controller().get(id).unwrap().is_parked());

    // The live branch keeps its socket and still gets the next message
    let second = spawn_sender(rendezvous.path(), vec![2]);
    let received = s.receive(&mut buf, 0u32, 0, Comm::WORLD);
    if s.branch().is_resumed() {
        exit_now(1);
    }
    assert_eq!(received.unwrap().source, 0);
    assert_eq!(buf[0], 2);
    assert_eq!(exit_code(second), 0);

    assert_eq!(s.controller().reap_all().unwrap(), 2);
    s.finalize().unwrap();
}

#[test]
#[serial]
fn test_checkpoint_mode_traces_checkpoint_pids() {
    let rendezvous = TempDir::new().unwrap();
    let traces = TempDir::new().unwrap();
    let transport = SocketTransport::new(0, 1, rendezvous.path()).unwrap();
    let config = InstrumentConfig::new(Mode::Checkpoint).with_trace_dir(traces.path());
    let mut s = Session::initialize(config, transport).unwrap();

    let sent = s.send(&[1u8, 2], 0, 3, Comm::WORLD);
    if s.branch().is_resumed() {
        exit_now(1);
    }
    sent.unwrap();

    let records = read_trace_dir(traces.path()).unwrap();
    assert_eq!(records.len(), 1);
    let parked = s.controller().list_parked(0);
    assert_eq!(records[0].checkpoint_pid, Some(parked[0].pid));
    assert_eq!(records[0].pid, std::process::id());

    assert_eq!(s.controller().reap_all().unwrap(), 1);
    s.finalize().unwrap();
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_orphaned_checkpoint_exits_when_its_rank_ends() {
    let rendezvous = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let pid_path = out.path().join("checkpoint.pid");

    // Orphans get reparented here so their exit status can be collected
    assert_eq!(unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1) }, 0);

    let dir = rendezvous.path().to_path_buf();
    let path = pid_path.clone();
    let rank = spawn_process(move || {
        let mut s = session(0, 1, &dir, Mode::Checkpoint);
        let sent = s.send(&[9i64], 0, 0, Comm::WORLD);
        if s.branch().is_resumed() || sent.is_err() {
            return 3;
        }
        let pid = s.controller().list_parked(0)[0].pid;
        fs::write(&path, pid.to_string()).unwrap();
        // Exit without resuming or reaping
        0
    });
    assert_eq!(exit_code(rank), 0);

    let checkpoint: i32 = fs::read_to_string(&pid_path).unwrap().parse().unwrap();
    assert_eq!(
        exit_code(Pid::from_raw(checkpoint)),
        rankfork::checkpoint::ORPHAN_EXIT_CODE
    );
}

#[test]
#[serial]
fn test_in_memory_transport_cannot_checkpoint() {
    let mut world = rankfork::MemoryWorld::create(1);
    let err = Session::initialize(InstrumentConfig::default(), world.remove(0))
        .err()
        .unwrap();
    assert!(matches!(err, Error::Config(_)));
}
