//! Interception layer: the six primitives instrumented programs call
//!
//! A [`Session`] owns the wrapped transport, the rank resolved at initialize, the
//! metadata recorder and the checkpoint manager. Nothing is process-global: the
//! descriptor of each call is handed to the manager explicitly.
//!
//! Per blocking call, in order:
//! 1. build the descriptor and record it
//! 2. in checkpoint mode, fork and park a checkpoint (failure stops the call)
//! 3. append a trace record if a trace directory is configured
//! 4. run the real primitive and return its outcome unchanged

use tracing::{debug, info, warn};

use crate::checkpoint::{Capture, CheckpointManager, Controller};
use crate::config::{InstrumentConfig, Mode};
use crate::error::{ConfigError, Result};
use crate::models::{Branch, CheckpointId, Comm, Descriptor, Peer, Rank, Tag};
use crate::recorder::MetadataRecorder;
use crate::trace::{TraceRecord, TraceSink};
use crate::transport::{decode_into, encode, Element, Status, Transport};

pub struct Session<T: Transport> {
    transport: T,
    config: InstrumentConfig,
    rank: Rank,
    /// Sequence number of the last intercepted call
    seq: u64,
    recorder: MetadataRecorder,
    manager: CheckpointManager,
    trace: Option<TraceSink>,
    branch: Branch,
    /// Transport initialized and not yet finalized
    active: bool,
}

impl<T: Transport> Session<T> {
    /// Set up the communication environment and resolve this process's rank.
    pub fn initialize(config: InstrumentConfig, mut transport: T) -> Result<Self> {
        if config.mode == Mode::Checkpoint && !transport.fork_safe() {
            return Err(ConfigError::TransportNotForkSafe.into());
        }

        transport.init()?;
        let rank = transport.rank()?;

        let trace = match (&config.trace_dir, config.mode.records_calls()) {
            (Some(dir), true) => match TraceSink::open(dir, rank) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    warn!(rank, error = %format!("{e:#}"), "trace log disabled");
                    None
                }
            },
            _ => None,
        };

        info!(rank, mode = %config.mode, "session initialized");
        Ok(Self {
            transport,
            config,
            rank,
            seq: 0,
            recorder: MetadataRecorder::new(),
            manager: CheckpointManager::new(rank),
            trace,
            branch: Branch::Live,
            active: true,
        })
    }

    /// Rank captured at initialize
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Forward to the transport's rank query
    pub fn comm_rank(&self) -> Result<Rank> {
        Ok(self.transport.rank()?)
    }

    pub fn size(&self) -> Result<u32> {
        Ok(self.transport.size()?)
    }

    /// Tear down the communication environment.
    ///
    /// Parked checkpoints are left alone; the controller owns their teardown.
    pub fn finalize(&mut self) -> Result<()> {
        self.transport.finalize()?;
        self.active = false;
        let parked = self.manager.parked_count();
        if parked > 0 {
            info!(rank = self.rank, parked, "finalized with parked checkpoints");
        } else {
            info!(rank = self.rank, "finalized");
        }
        Ok(())
    }

    /// Blocking send of `buf` to `dest`.
    pub fn send<E: Element>(&mut self, buf: &[E], dest: Rank, tag: i32, comm: Comm) -> Result<()> {
        let descriptor = Descriptor::send(dest, tag, buf.len(), E::DATATYPE, comm);
        self.intercept(descriptor)?;

        self.transport
            .send_bytes(&encode(buf), E::DATATYPE, buf.len(), dest, tag, comm)?;
        Ok(())
    }

    /// Blocking receive into `buf`.
    ///
    /// The checkpoint is taken before waiting, so it holds `buf` as it was
    /// before any data arrived.
    pub fn receive<E: Element>(
        &mut self,
        buf: &mut [E],
        source: impl Into<Peer>,
        tag: impl Into<Tag>,
        comm: Comm,
    ) -> Result<Status> {
        let source = source.into();
        let tag = tag.into();
        let descriptor = Descriptor::receive(source, tag, buf.len(), E::DATATYPE, comm);
        self.intercept(descriptor)?;

        let (bytes, status) =
            self.transport
                .recv_bytes(buf.len(), E::DATATYPE, source, tag, comm)?;
        decode_into(&bytes, buf)?;
        Ok(status)
    }

    fn intercept(&mut self, descriptor: Descriptor) -> Result<()> {
        if !self.config.mode.records_calls() {
            return Ok(());
        }

        self.seq += 1;
        let id = CheckpointId::new(self.rank, self.seq);
        self.recorder.record(descriptor);
        debug!(call = %id, %descriptor, "intercepted");

        let checkpoint_pid = match self.config.mode {
            Mode::Checkpoint => match self.manager.capture_and_park(id, &descriptor)? {
                Capture::Live(info) => Some(info.pid),
                Capture::Resumed(from) => {
                    self.branch = Branch::Resumed { from };
                    self.transport.on_resume()?;
                    info!(checkpoint = %from, pid = std::process::id(), "running from checkpoint");
                    return Ok(());
                }
            },
            _ => None,
        };

        self.write_trace(id, descriptor, checkpoint_pid);
        Ok(())
    }

    fn write_trace(&mut self, id: CheckpointId, descriptor: Descriptor, checkpoint_pid: Option<i32>) {
        let Some(sink) = self.trace.as_mut() else {
            return;
        };
        let record = TraceRecord {
            rank: id.rank,
            seq: id.seq,
            pid: std::process::id(),
            branch: self.branch,
            checkpoint_pid,
            descriptor,
            recorded_at: chrono::Utc::now(),
        };
        if let Err(e) = sink.append(&record) {
            warn!(call = %id, error = %format!("{e:#}"), "failed to append trace record");
        }
    }

    /// Controller over the checkpoints this session created.
    ///
    /// Resuming is refused until [`Session::finalize`] has released the
    /// transport; reaping and listing work at any time.
    pub fn controller(&mut self) -> Controller<'_> {
        Controller::with_live_transport(&mut self.manager, self.active)
    }

    /// Whether this is the original process or a resumed checkpoint
    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn recorder(&self) -> &MetadataRecorder {
        &self.recorder
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Sequence number of the most recent intercepted call
    pub fn last_seq(&self) -> u64 {
        self.seq
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
