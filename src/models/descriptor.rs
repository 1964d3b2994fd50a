use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer identity of a participant within a communication group.
pub type Rank = u32;

/// Which side of a message exchange a call is on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Send,
    Receive,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Send => write!(f, "send"),
            OpKind::Receive => write!(f, "receive"),
        }
    }
}

/// The other party of a call: destination for send, source for receive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Peer {
    Rank(Rank),
    /// Wildcard source; only meaningful for receive
    Any,
}

impl Peer {
    /// Returns true if a message from `rank` satisfies this selector
    pub fn accepts(&self, rank: Rank) -> bool {
        match self {
            Peer::Rank(r) => *r == rank,
            Peer::Any => true,
        }
    }

    pub fn rank(&self) -> Option<Rank> {
        match self {
            Peer::Rank(r) => Some(*r),
            Peer::Any => None,
        }
    }
}

impl From<Rank> for Peer {
    fn from(rank: Rank) -> Self {
        Peer::Rank(rank)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Rank(r) => write!(f, "{r}"),
            Peer::Any => write!(f, "any"),
        }
    }
}

/// Message tag, or the receive-side wildcard
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Value(i32),
    Any,
}

impl Tag {
    /// Tag equality where either side may be the wildcard
    pub fn matches(&self, other: &Tag) -> bool {
        match (self, other) {
            (Tag::Any, _) | (_, Tag::Any) => true,
            (Tag::Value(a), Tag::Value(b)) => a == b,
        }
    }
}

impl From<i32> for Tag {
    fn from(value: i32) -> Self {
        Tag::Value(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Value(t) => write!(f, "{t}"),
            Tag::Any => write!(f, "any"),
        }
    }
}

/// Element type of a communication buffer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    Byte,
    Int,
    Long,
    Float,
    Double,
}

impl Datatype {
    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            Datatype::Byte => 1,
            Datatype::Int | Datatype::Float => 4,
            Datatype::Long | Datatype::Double => 8,
        }
    }
}

/// Communication group identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Comm(pub u32);

impl Comm {
    /// The group containing every rank of the job
    pub const WORLD: Comm = Comm(0);
}

impl fmt::Display for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Comm::WORLD {
            write!(f, "world")
        } else {
            write!(f, "comm#{}", self.0)
        }
    }
}

/// Identifying metadata of one blocking communication call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub op: OpKind,
    pub peer: Peer,
    pub tag: Tag,
    pub count: usize,
    pub datatype: Datatype,
    pub comm: Comm,
}

impl Descriptor {
    pub fn send(dest: Rank, tag: i32, count: usize, datatype: Datatype, comm: Comm) -> Self {
        Self {
            op: OpKind::Send,
            peer: Peer::Rank(dest),
            tag: Tag::Value(tag),
            count,
            datatype,
            comm,
        }
    }

    pub fn receive(source: Peer, tag: Tag, count: usize, datatype: Datatype, comm: Comm) -> Self {
        Self {
            op: OpKind::Receive,
            peer: source,
            tag,
            count,
            datatype,
            comm,
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.op {
            OpKind::Send => "dest",
            OpKind::Receive => "source",
        };
        write!(
            f,
            "{} {}={} tag={} count={} type={:?} comm={}",
            self.op, dir, self.peer, self.tag, self.count, self.datatype, self.comm
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_tag_matches_anything() {
        assert!(Tag::Any.matches(&Tag::Value(7)));
        assert!(Tag::Value(7).matches(&Tag::Any));
        assert!(Tag::Value(7).matches(&Tag::Value(7)));
        assert!(!Tag::Value(7).matches(&Tag::Value(8)));
    }

    #[test]
    fn test_peer_accepts() {
        assert!(Peer::Any.accepts(3));
        assert!(Peer::Rank(3).accepts(3));
        assert!(!Peer::Rank(3).accepts(2));
    }

    #[test]
    fn test_descriptor_display() {
        let d = Descriptor::receive(Peer::Rank(0), Tag::Value(0), 1, Datatype::Int, Comm::WORLD);
        assert_eq!(
            d.to_string(),
            "receive source=0 tag=0 count=1 type=Int comm=world"
        );
    }

    #[test]
    fn test_descriptor_json_shape() {
        let d = Descriptor::send(1, 5, 4, Datatype::Double, Comm::WORLD);
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"op\":\"send\""));
        assert!(json.contains("\"peer\":{\"rank\":1}"));
        let back: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
