//! In-process transport backed by a lock-free queue.
//!
//! Packets written by one side are drained by a pump (a test, or glue code
//! bridging to a real link) and handed to the other side. Closing the queue
//! makes every later write fail, which is how tests simulate a dropped link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_queue::SegQueue;

use crate::error::{Result, TetherStreamError};
use crate::transport::Transport;

/// A [`Transport`] whose writes land in a shared queue.
#[derive(Debug, Clone, Default)]
pub struct QueueTransport {
    inner: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    packets: SegQueue<Bytes>,
    closed: AtomicBool,
    max_packet_size: Option<usize>,
}

impl QueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that advertises a link packet size.
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            inner: Arc::new(Shared {
                max_packet_size: Some(max_packet_size),
                ..Shared::default()
            }),
        }
    }

    /// Take the oldest written packet.
    pub fn pop(&self) -> Option<Bytes> {
        self.inner.packets.pop()
    }

    /// Take every written packet, oldest first.
    pub fn drain(&self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.inner.packets.pop()).collect()
    }

    /// Number of packets waiting.
    pub fn len(&self) -> usize {
        self.inner.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.packets.is_empty()
    }

    /// Make all further writes fail.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Transport for QueueTransport {
    fn write(&self, packet: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(TetherStreamError::TransportClosed);
        }
        self.inner.packets.push(packet);
        Ok(())
    }

    fn max_packet_size(&self) -> Option<usize> {
        self.inner.max_packet_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_drain_in_order() {
        let t = QueueTransport::new();
        t.write(Bytes::from_static(b"1")).unwrap();
        t.write(Bytes::from_static(b"2")).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.drain(), vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);
        assert!(t.is_empty());
    }

    #[test]
    fn closed_queue_rejects_writes() {
        let t = QueueTransport::new();
        let writer = t.clone();
        t.close();
        assert!(matches!(
            writer.write(Bytes::from_static(b"x")),
            Err(TetherStreamError::TransportClosed)
        ));
    }
}
