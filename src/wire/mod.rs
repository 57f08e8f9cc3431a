//! Encrypted datagram wire format: header codec and AEAD framing.

pub mod header;
pub mod session;

pub use header::{CryptoIds, WireHeader};
pub use session::{Receiver, ReplayWindow, Sender};
