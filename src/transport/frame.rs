use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{Read, Write};

use crate::error::TransportError;
use crate::models::{Comm, Datatype, Peer, Rank, Tag};

/// Upper bound on a single frame, so a corrupt length prefix cannot
/// trigger a huge allocation
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// One point-to-point message as it travels between ranks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub source: Rank,
    pub tag: i32,
    pub comm: Comm,
    pub datatype: Datatype,
    pub count: usize,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Returns true if a receive posted with these selectors accepts this message
    pub fn matches(&self, source: Peer, tag: Tag, comm: Comm) -> bool {
        self.comm == comm && source.accepts(self.source) && tag.matches(&Tag::Value(self.tag))
    }
}

/// Remove and return the oldest queued message accepted by the selectors.
///
/// Scanning from the front keeps messages between one pair of ranks
/// non-overtaking.
pub(crate) fn take_match(
    queue: &mut VecDeque<Envelope>,
    source: Peer,
    tag: Tag,
    comm: Comm,
) -> Option<Envelope> {
    let index = queue.iter().position(|e| e.matches(source, tag, comm))?;
    queue.remove(index)
}

/// Write a length-prefixed JSON frame.
///
/// Format: 4-byte big-endian length prefix + JSON data
pub fn write_frame<W: Write>(stream: &mut W, envelope: &Envelope) -> Result<(), TransportError> {
    let json = serde_json::to_vec(envelope)
        .map_err(|e| TransportError::Protocol(format!("failed to encode envelope: {e}")))?;
    let len = u32::try_from(json.len())
        .map_err(|_| TransportError::Protocol(format!("frame too large: {} bytes", json.len())))?;

    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(&json)?;
    stream.flush()?;
    Ok(())
}

/// Read a length-prefixed JSON frame.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<Envelope, TransportError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_LEN {
        return Err(TransportError::Protocol(format!(
            "frame too large: {len} bytes"
        )));
    }

    let mut json = vec![0u8; len];
    stream.read_exact(&mut json)?;

    serde_json::from_slice(&json)
        .map_err(|e| TransportError::Protocol(format!("failed to decode envelope: {e}")))
}
