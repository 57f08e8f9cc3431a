//! Cryptographic building blocks: the PQC capability provider, AEAD
//! dispatch, and the transport key schedule.

pub mod aead;
pub mod kdf;
pub mod provider;

pub use aead::{AeadAlgorithm, SessionKey};
pub use kdf::{Role, TransportKeys, derive_transport_keys};
pub use provider::{
    Encapsulation, KemDecapsulator, KemKeyPair, PqPrimitives, PqcleanProvider, SharedSecret,
    SigKeyPair,
};
