//! # pqlink
//!
//! Post-quantum secure UDP transport proxy pair linking a drone and a
//! ground-control station (GCS). Each side runs a local proxy that:
//!
//! - performs an authenticated PQC key-exchange handshake over TCP
//!   (KEM encapsulation, transcript-bound signature, PSK mutual
//!   authentication),
//! - derives per-direction AEAD keys with HKDF-SHA256,
//! - bridges a local plaintext UDP application socket to the remote
//!   encrypted UDP socket with replay protection, and
//! - supports in-band cryptographic rekey across the suite registry
//!   without dropping the session.
//!
//! ## Modules
//!
//! - [`core`]: constants, configuration, and error types
//! - [`suites`]: the `{KEM, AEAD, signature}` suite registry
//! - [`crypto`]: the PQC capability provider, AEAD dispatch, key schedule
//! - [`wire`]: encrypted datagram header and AEAD framing
//! - [`handshake`]: the TCP handshake protocol and rate guard
//! - [`control`]: the in-band rekey state machine
//! - [`proxy`]: the bidirectional UDP bridge
//! - [`identity`]: persistent GCS signing keypair storage

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod core;
pub mod crypto;
pub mod handshake;
pub mod identity;
pub mod proxy;
pub mod suites;
pub mod wire;

pub use crate::core::{Config, DropKind, HandshakeError, ProxyError, RecvError, SendError, SuiteError};
pub use crypto::kdf::Role;
pub use crypto::provider::{PqPrimitives, PqcleanProvider};
pub use proxy::{ConsoleCommand, CountersSnapshot, RoleIdentity};
pub use suites::Suite;
