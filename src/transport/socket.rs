//! Unix-socket transport: one process per rank
//!
//! Every rank binds `<dir>/rank-<r>.sock`. A send opens one connection to the
//! destination's socket and writes a single frame; a receive accepts connections
//! until a matching frame arrives, parking non-matching frames in a local queue.
//! All in-flight state lives in the kernel, so forked checkpoints do not carry
//! private copies of undelivered messages.

use std::collections::VecDeque;
use std::fs::{self, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::frame::{read_frame, take_match, write_frame, Envelope};
use super::{check_comm, check_rank, check_shape, check_source, Status, Transport};
use crate::error::TransportError;
use crate::models::{Comm, Datatype, Peer, Rank, Tag};

pub const RANK_ENV: &str = "RANKFORK_RANK";
pub const SIZE_ENV: &str = "RANKFORK_SIZE";
pub const DIR_ENV: &str = "RANKFORK_DIR";

/// How long a send keeps retrying while the destination has not bound yet
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct SocketTransport {
    rank: Rank,
    size: u32,
    dir: PathBuf,
    listener: Option<UnixListener>,
    pending: VecDeque<Envelope>,
    connect_timeout: Duration,
}

impl SocketTransport {
    /// Create a transport for `rank` in a group of `size` rendezvousing in `dir`
    pub fn new(rank: Rank, size: u32, dir: impl Into<PathBuf>) -> Result<Self, TransportError> {
        check_rank(rank, size)?;
        Ok(Self {
            rank,
            size,
            dir: dir.into(),
            listener: None,
            pending: VecDeque::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Build from the variables a launcher exports to each rank
    pub fn from_env() -> Result<Self, TransportError> {
        let rank = parse_env(RANK_ENV)?;
        let size = parse_env(SIZE_ENV)?;
        let dir = std::env::var(DIR_ENV)
            .map_err(|_| TransportError::Environment(format!("{DIR_ENV} is not set")))?;
        Self::new(rank, size, dir)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Path of the socket a rank listens on
    pub fn socket_path(dir: &Path, rank: Rank) -> PathBuf {
        dir.join(format!("rank-{rank}.sock"))
    }

    fn bind(&mut self) -> Result<(), TransportError> {
        fs::create_dir_all(&self.dir)?;
        let path = Self::socket_path(&self.dir, self.rank);

        // Ignore NotFound to avoid a TOCTOU race with a concurrent cleanup
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        let listener = UnixListener::bind(&path)?;
        fs::set_permissions(&path, Permissions::from_mode(0o600))?;
        self.listener = Some(listener);
        Ok(())
    }

    fn listener(&self) -> Result<&UnixListener, TransportError> {
        self.listener.as_ref().ok_or(TransportError::NotInitialized)
    }

    fn connect(&self, dest: Rank) -> Result<UnixStream, TransportError> {
        let path = Self::socket_path(&self.dir, dest);
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            match UnixStream::connect(&path) {
                Ok(stream) => return Ok(stream),
                Err(e)
                    if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused)
                        && Instant::now() < deadline =>
                {
                    thread::sleep(CONNECT_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn parse_env(name: &str) -> Result<u32, TransportError> {
    let raw = std::env::var(name)
        .map_err(|_| TransportError::Environment(format!("{name} is not set")))?;
    raw.trim()
        .parse()
        .map_err(|_| TransportError::Environment(format!("{name}='{raw}' is not a number")))
}

impl Transport for SocketTransport {
    fn init(&mut self) -> Result<(), TransportError> {
        if self.listener.is_some() {
            return Err(TransportError::AlreadyInitialized);
        }
        self.bind()?;
        debug!(rank = self.rank, dir = %self.dir.display(), "socket transport bound");
        Ok(())
    }

    fn rank(&self) -> Result<Rank, TransportError> {
        self.listener()?;
        Ok(self.rank)
    }

    fn size(&self) -> Result<u32, TransportError> {
        self.listener()?;
        Ok(self.size)
    }

    fn finalize(&mut self) -> Result<(), TransportError> {
        if self.listener.take().is_none() {
            return Err(TransportError::NotInitialized);
        }
        if !self.pending.is_empty() {
            warn!(
                rank = self.rank,
                pending = self.pending.len(),
                "finalizing with unreceived messages"
            );
        }
        match fs::remove_file(Self::socket_path(&self.dir, self.rank)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn send_bytes(
        &mut self,
        payload: &[u8],
        datatype: Datatype,
        count: usize,
        dest: Rank,
        tag: i32,
        comm: Comm,
    ) -> Result<(), TransportError> {
        self.listener()?;
        check_comm(comm)?;
        check_rank(dest, self.size)?;

        let envelope = Envelope {
            source: self.rank,
            tag,
            comm,
            datatype,
            count,
            payload: payload.to_vec(),
        };
        let mut stream = self.connect(dest)?;
        write_frame(&mut stream, &envelope)
    }

    fn recv_bytes(
        &mut self,
        capacity: usize,
        datatype: Datatype,
        source: Peer,
        tag: Tag,
        comm: Comm,
    ) -> Result<(Vec<u8>, Status), TransportError> {
        self.listener()?;
        check_comm(comm)?;
        check_source(source, self.size)?;

        let envelope = match take_match(&mut self.pending, source, tag, comm) {
            Some(envelope) => envelope,
            None => loop {
                let (mut stream, _addr) = self.listener()?.accept()?;
                let envelope = read_frame(&mut stream)?;
                if envelope.matches(source, tag, comm) {
                    break envelope;
                }
                self.pending.push_back(envelope);
            },
        };

        check_shape(&envelope, datatype, capacity)?;
        let status = Status {
            source: envelope.source,
            tag: envelope.tag,
            count: envelope.count,
        };
        Ok((envelope.payload, status))
    }

    fn fork_safe(&self) -> bool {
        true
    }

    /// Take over the rank's socket path so peers replaying their sends reach
    /// this branch rather than the live one.
    fn on_resume(&mut self) -> Result<(), TransportError> {
        if self.listener.is_none() {
            return Ok(());
        }
        self.bind()?;
        debug!(rank = self.rank, "resumed branch rebound its socket");
        Ok(())
    }
}
