//! TetherStream -- packet framing for the Tether secure channel.
//!
//! Turns logical messages into transport packets and back:
//! - **Framing**: length-prefixed frames, so byte-stream links work as well
//!   as packet links
//! - **Chunking**: messages above the negotiated packet size are split into
//!   ordered chunks
//! - **Reassembly**: chunk runs are rebuilt and validated; partial messages
//!   are never handed out
//! - **Version exchange**: the pre-handshake protocol version announcement

pub mod error;
pub mod frame;
pub mod message;
pub mod reassembly;
pub mod stream;
pub mod transport;
pub mod version;

// Re-export key public types at crate root.
pub use error::{Result, TetherStreamError};
pub use frame::Frame;
pub use message::{MessageKind, StreamMessage};
pub use stream::{MessageStream, StreamConfig, StreamState};
pub use transport::{QueueTransport, Transport};
pub use version::{NegotiatedVersion, VersionExchange, VersionRange};
