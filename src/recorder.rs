//! Metadata recorder: the descriptor of the communication currently in flight
//!
//! A single slot, overwritten on every call. History is not kept here; the trace
//! log is the place to persist descriptors for cross-rank correlation.

use crate::models::Descriptor;

#[derive(Debug, Default)]
pub struct MetadataRecorder {
    current: Option<Descriptor>,
    recorded: u64,
}

impl MetadataRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current descriptor
    pub fn record(&mut self, descriptor: Descriptor) {
        self.current = Some(descriptor);
        self.recorded += 1;
    }

    /// The most recently recorded descriptor, if any call has been recorded
    pub fn current(&self) -> Option<&Descriptor> {
        self.current.as_ref()
    }

    /// Number of descriptors recorded over the recorder's lifetime
    pub fn recorded(&self) -> u64 {
        self.recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comm, Datatype, Peer, Tag};

    #[test]
    fn test_record_overwrites_previous_descriptor() {
        let mut recorder = MetadataRecorder::new();
        assert!(recorder.current().is_none());

        let first = Descriptor::send(1, 0, 1, Datatype::Int, Comm::WORLD);
        let second = Descriptor::receive(Peer::Any, Tag::Value(3), 8, Datatype::Byte, Comm::WORLD);
        recorder.record(first);
        recorder.record(second);

        assert_eq!(recorder.current(), Some(&second));
        assert_eq!(recorder.recorded(), 2);
    }
}
