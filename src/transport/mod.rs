//! The wrapped message-passing runtime
//!
//! [`Transport`] is the six-primitive surface the interception layer forwards to.
//! Two implementations ship with the crate:
//! - [`SocketTransport`]: one process per rank, Unix socket per rank, fork-safe
//! - [`MemoryTransport`]: thread-per-rank world for in-process use, not fork-safe

mod frame;
pub mod memory;
pub mod socket;

pub use frame::{read_frame, write_frame, Envelope};
pub use memory::{MemoryTransport, MemoryWorld};
pub use socket::SocketTransport;

use crate::error::TransportError;
use crate::models::{Comm, Datatype, Peer, Rank, Tag};

/// Completion information of a receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub source: Rank,
    pub tag: i32,
    /// Number of elements actually received
    pub count: usize,
}

/// A message-passing runtime with blocking point-to-point primitives.
pub trait Transport {
    /// Set up the communication environment.
    fn init(&mut self) -> Result<(), TransportError>;

    fn rank(&self) -> Result<Rank, TransportError>;

    fn size(&self) -> Result<u32, TransportError>;

    /// Tear down the communication environment.
    fn finalize(&mut self) -> Result<(), TransportError>;

    /// Blocking send of `count` elements of `datatype` already encoded in `payload`.
    fn send_bytes(
        &mut self,
        payload: &[u8],
        datatype: Datatype,
        count: usize,
        dest: Rank,
        tag: i32,
        comm: Comm,
    ) -> Result<(), TransportError>;

    /// Blocking receive of at most `capacity` elements of `datatype`.
    fn recv_bytes(
        &mut self,
        capacity: usize,
        datatype: Datatype,
        source: Peer,
        tag: Tag,
        comm: Comm,
    ) -> Result<(Vec<u8>, Status), TransportError>;

    /// Whether the runtime's state survives process duplication.
    ///
    /// Transports whose queues live in process memory return false: a forked
    /// checkpoint would carry a private copy of every pending message.
    fn fork_safe(&self) -> bool;

    /// Called in a checkpoint branch right after the controller wakes it.
    fn on_resume(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Plain element types that can travel in a communication buffer.
pub trait Element: Copy + Default {
    const DATATYPE: Datatype;

    fn write_le(&self, out: &mut Vec<u8>);

    /// Decode from exactly `DATATYPE.size()` little-endian bytes
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dt:expr) => {
        impl Element for $ty {
            const DATATYPE: Datatype = $dt;

            fn write_le(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_element!(u8, Datatype::Byte);
impl_element!(i32, Datatype::Int);
impl_element!(i64, Datatype::Long);
impl_element!(f32, Datatype::Float);
impl_element!(f64, Datatype::Double);

/// Encode a typed buffer into its wire bytes
pub fn encode<E: Element>(buf: &[E]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() * E::DATATYPE.size());
    for value in buf {
        value.write_le(&mut out);
    }
    out
}

/// Decode wire bytes into the front of `buf`, returning the element count.
pub fn decode_into<E: Element>(bytes: &[u8], buf: &mut [E]) -> Result<usize, TransportError> {
    let width = E::DATATYPE.size();
    if bytes.len() % width != 0 {
        return Err(TransportError::Protocol(format!(
            "payload of {} bytes is not a whole number of {:?} elements",
            bytes.len(),
            E::DATATYPE
        )));
    }
    let count = bytes.len() / width;
    if count > buf.len() {
        return Err(TransportError::Truncated {
            incoming: count,
            capacity: buf.len(),
        });
    }
    for (slot, chunk) in buf.iter_mut().zip(bytes.chunks_exact(width)) {
        *slot = E::read_le(chunk);
    }
    Ok(count)
}

/// Check a matched message against the receiver's buffer shape.
pub(crate) fn check_shape(
    envelope: &Envelope,
    datatype: Datatype,
    capacity: usize,
) -> Result<(), TransportError> {
    if envelope.datatype != datatype {
        return Err(TransportError::TypeMismatch {
            sent: envelope.datatype,
            expected: datatype,
        });
    }
    if envelope.count > capacity {
        return Err(TransportError::Truncated {
            incoming: envelope.count,
            capacity,
        });
    }
    Ok(())
}

pub(crate) fn check_comm(comm: Comm) -> Result<(), TransportError> {
    if comm != Comm::WORLD {
        return Err(TransportError::InvalidComm(comm.0));
    }
    Ok(())
}

pub(crate) fn check_rank(rank: Rank, size: u32) -> Result<(), TransportError> {
    if rank >= size {
        return Err(TransportError::InvalidRank { rank, size });
    }
    Ok(())
}

pub(crate) fn check_source(source: Peer, size: u32) -> Result<(), TransportError> {
    match source {
        Peer::Rank(r) => check_rank(r, size),
        Peer::Any => Ok(()),
    }
}
