//! Core constants, configuration, and error types.

pub mod config;
pub mod constants;
pub mod error;

pub use config::{Config, ConfigError, parse_psk};
pub use constants::*;
pub use error::{
    ControlError, CryptoError, DropKind, HandshakeError, ProxyError, RecvError, SendError,
    SuiteError,
};
