//! Cross-rank correlation of send and receive records
//!
//! Each rank only knows its own call stream. Pairing a send with the receive
//! that consumed it is done here, after the fact, from the trace logs.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{live_records, TraceRecord};
use crate::models::{CheckpointId, OpKind, Rank, Tag};

/// A send paired with the receive that consumed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLink {
    pub send: CheckpointId,
    pub receive: CheckpointId,
    pub tag: i32,
}

#[derive(Debug, Default)]
pub struct Correlation {
    pub links: Vec<MessageLink>,
    /// Live calls with no counterpart in the logs
    pub unmatched: Vec<CheckpointId>,
    partners: HashMap<CheckpointId, CheckpointId>,
}

impl Correlation {
    /// The other end of a matched call
    pub fn partner(&self, id: CheckpointId) -> Option<CheckpointId> {
        self.partners.get(&id).copied()
    }
}

/// Pair live sends with live receives.
///
/// Receives are processed per rank in call order. A receive takes, from each
/// source it accepts, the oldest unmatched send addressed to it with a
/// compatible tag; among several accepted sources the earliest-recorded send
/// wins. This mirrors non-overtaking delivery; wildcard-source receives are
/// resolved by timestamp and can be ambiguous under heavy contention.
pub fn correlate(records: &[TraceRecord]) -> Correlation {
    // Sends grouped by (source rank, destination rank), in call order
    let mut sends: BTreeMap<(Rank, Rank), Vec<&TraceRecord>> = BTreeMap::new();
    let mut receives: BTreeMap<Rank, Vec<&TraceRecord>> = BTreeMap::new();

    for record in live_records(records) {
        match record.descriptor.op {
            OpKind::Send => {
                if let Some(dest) = record.descriptor.peer.rank() {
                    sends.entry((record.rank, dest)).or_default().push(record);
                }
            }
            OpKind::Receive => receives.entry(record.rank).or_default().push(record),
        }
    }
    for list in sends.values_mut() {
        list.sort_by_key(|r| r.seq);
    }
    for list in receives.values_mut() {
        list.sort_by_key(|r| r.seq);
    }

    let mut matched: HashSet<CheckpointId> = HashSet::new();
    let mut correlation = Correlation::default();

    for (rank, rank_receives) in &receives {
        for receive in rank_receives {
            let candidate = sends
                .iter()
                .filter(|((source, dest), _)| {
                    dest == rank && receive.descriptor.peer.accepts(*source)
                })
                .filter_map(|(_, list)| {
                    list.iter().find(|send| {
                        !matched.contains(&send.id())
                            && receive.descriptor.tag.matches(&send.descriptor.tag)
                    })
                })
                .min_by_key(|send| (send.recorded_at, send.rank, send.seq));

            if let Some(send) = candidate {
                let tag = match send.descriptor.tag {
                    Tag::Value(t) => t,
                    Tag::Any => -1,
                };
                matched.insert(send.id());
                matched.insert(receive.id());
                correlation.partners.insert(send.id(), receive.id());
                correlation.partners.insert(receive.id(), send.id());
                correlation.links.push(MessageLink {
                    send: send.id(),
                    receive: receive.id(),
                    tag,
                });
            }
        }
    }

    correlation.unmatched = live_records(records)
        .map(TraceRecord::id)
        .filter(|id| !matched.contains(id))
        .collect();
    correlation.links.sort_by_key(|l| (l.send, l.receive));
    correlation
}
