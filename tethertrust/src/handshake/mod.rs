// Authenticated key-exchange handshake.

pub mod messages;
pub mod runner;
pub mod state;
pub mod strategy;

pub use runner::{HandshakeMessage, HandshakeRunner};
pub use state::{HandshakeMode, HandshakeState, Role};
pub use strategy::{
    Association, Exchange, ExchangeOutcome, HandshakeStrategy, OobAssociation, Reconnection,
    DEFAULT_CODE_DIGITS,
};
