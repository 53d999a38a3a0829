// Out-of-band verification.

pub mod connect;
pub mod verifier;

pub use connect::{connect_oob, CancelHandle, OobConnector};
pub use verifier::{OobChannel, OobVerifier, OOB_BUNDLE_LEN};
