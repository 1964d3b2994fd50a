pub mod checkpoint;
pub mod descriptor;

pub use checkpoint::{Branch, CheckpointId, CheckpointInfo, CheckpointState};
pub use descriptor::{Comm, Datatype, Descriptor, OpKind, Peer, Rank, Tag};
