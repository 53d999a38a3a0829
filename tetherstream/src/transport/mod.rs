//! Transport boundary.
//!
//! The stream never owns a socket or a GATT characteristic. It writes whole
//! packets through [`Transport`], and whoever owns the link feeds inbound
//! bytes back in with `MessageStream::on_data_received`.

pub mod queue;

use bytes::Bytes;

use crate::error::Result;

pub use queue::QueueTransport;

/// Outbound half of a physical link (BLE characteristic, RFCOMM socket, ...).
///
/// `write` must not call back into the stream or channel that owns this
/// transport on the same thread: those hold their state lock while writing.
pub trait Transport: Send + Sync {
    /// Write one packet. An error is fatal for the stream.
    fn write(&self, packet: Bytes) -> Result<()>;

    /// Largest packet the link currently carries, if it knows. Every frame
    /// the stream writes fits in it.
    fn max_packet_size(&self) -> Option<usize> {
        None
    }
}
