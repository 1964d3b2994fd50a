//! In-process transport: every rank is a thread sharing one mailbox table

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::frame::{take_match, Envelope};
use super::{check_comm, check_rank, check_shape, check_source, Status, Transport};
use crate::error::TransportError;
use crate::models::{Comm, Datatype, Peer, Rank, Tag};

#[derive(Debug, Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

/// Factory for a group of connected in-process ranks
pub struct MemoryWorld;

impl MemoryWorld {
    /// Create `size` transports, one per rank, sharing a mailbox table
    pub fn create(size: u32) -> Vec<MemoryTransport> {
        let mailboxes: Arc<Vec<Mailbox>> =
            Arc::new((0..size).map(|_| Mailbox::default()).collect());
        (0..size)
            .map(|rank| MemoryTransport {
                rank,
                size,
                mailboxes: Arc::clone(&mailboxes),
                initialized: false,
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    rank: Rank,
    size: u32,
    mailboxes: Arc<Vec<Mailbox>>,
    initialized: bool,
}

impl MemoryTransport {
    fn ensure_init(&self) -> Result<(), TransportError> {
        if self.initialized {
            Ok(())
        } else {
            Err(TransportError::NotInitialized)
        }
    }

    fn lock(mailbox: &Mailbox) -> Result<MutexGuard<'_, VecDeque<Envelope>>, TransportError> {
        mailbox
            .queue
            .lock()
            .map_err(|_| TransportError::Protocol("mailbox lock poisoned".to_string()))
    }
}

impl Transport for MemoryTransport {
    fn init(&mut self) -> Result<(), TransportError> {
        if self.initialized {
            return Err(TransportError::AlreadyInitialized);
        }
        self.initialized = true;
        Ok(())
    }

    fn rank(&self) -> Result<Rank, TransportError> {
        self.ensure_init()?;
        Ok(self.rank)
    }

    fn size(&self) -> Result<u32, TransportError> {
        self.ensure_init()?;
        Ok(self.size)
    }

    fn finalize(&mut self) -> Result<(), TransportError> {
        self.ensure_init()?;
        self.initialized = false;
        Ok(())
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
        self.ensure_init()?;
        check_comm(comm)?;
        check_rank(dest, self.size)?;

        let mailbox = &self.mailboxes[dest as usize];
        Self::lock(mailbox)?.push_back(Envelope {
            source: self.rank,
            tag,
            comm,
            datatype,
            count,
            payload: payload.to_vec(),
        });
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn recv_bytes(
        &mut self,
        capacity: usize,
        datatype: Datatype,
        source: Peer,
        tag: Tag,
        comm: Comm,
    ) -> Result<(Vec<u8>, Status), TransportError> {
        self.ensure_init()?;
        check_comm(comm)?;
        check_source(source, self.size)?;

        let mailbox = &self.mailboxes[self.rank as usize];
        let mut queue = Self::lock(mailbox)?;
        let envelope = loop {
            if let Some(envelope) = take_match(&mut queue, source, tag, comm) {
                break envelope;
            }
            queue = mailbox
                .arrived
                .wait(queue)
                .map_err(|_| TransportError::Protocol("mailbox lock poisoned".to_string()))?;
        };
        drop(queue);

        check_shape(&envelope, datatype, capacity)?;
        let status = Status {
            source: envelope.source,
            tag: envelope.tag,
            count: envelope.count,
        };
        Ok((envelope.payload, status))
    }

    fn fork_safe(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::encode;
    use std::thread;

    #[test]
    fn test_threads_exchange_a_message() {
        let mut world = MemoryWorld::create(2);
        let mut b = world.pop().unwrap();
        let mut a = world.pop().unwrap();
        a.init().unwrap();
        b.init().unwrap();

        let receiver = thread::spawn(move || {
            b.recv_bytes(1, Datatype::Int, Peer::Rank(0), Tag::Value(0), Comm::WORLD)
                .unwrap()
        });
        a.send_bytes(&encode(&[123i32]), Datatype::Int, 1, 1, 0, Comm::WORLD)
            .unwrap();

        let (bytes, status) = receiver.join().unwrap();
        assert_eq!(bytes, encode(&[123i32]));
        assert_eq!(status.source, 0);
    }

    #[test]
    fn test_memory_transport_is_not_fork_safe() {
        let world = MemoryWorld::create(1);
        assert!(!world[0].fork_safe());
    }

    #[test]
    fn test_send_to_invalid_rank() {
        let mut world = MemoryWorld::create(2);
        let a = &mut world[0];
        a.init().unwrap();
        let err = a
            .send_bytes(&[0], Datatype::Byte, 1, 5, 0, Comm::WORLD)
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRank { rank: 5, size: 2 }));
    }
}
