//! Error types for the pqlink proxy.

use thiserror::Error;

/// Errors from the suite registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SuiteError {
    /// No suite or component matches the given identifier.
    #[error("unknown suite: {0}")]
    UnknownSuite(String),
}

/// Errors from the PQC primitive provider.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provider cannot serve this KEM mechanism.
    #[error("unsupported KEM: {0}")]
    UnsupportedKem(String),

    /// The provider cannot serve this signature mechanism.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedSig(String),

    /// Key material or ciphertext bytes did not parse.
    #[error("malformed {0}")]
    Malformed(&'static str),

    /// HKDF expansion failed.
    #[error("key derivation failed")]
    KeyDerivation,
}

/// Errors on the encrypt path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The sequence space under the current epoch is exhausted.
    /// The sender refuses to emit; a rekey is required.
    #[error("sequence number space exhausted; rekey required")]
    SeqExhausted,

    /// AEAD sealing failed.
    #[error("AEAD encryption failed")]
    EncryptFailed,
}

/// Classified drop reasons surfaced to the proxy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    /// Replay window rejected the sequence number.
    Replay,
    /// AEAD tag verification failed.
    Auth,
    /// Version, crypto IDs, or header shape did not match.
    Header,
    /// Session ID or epoch did not match the active context.
    SessionEpoch,
    /// Datagram source differs from the pinned peer address.
    SrcAddr,
    /// Anything else (unknown packet type, socket error, bad control JSON).
    Other,
}

/// Errors on the decrypt path, one per classification step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecvError {
    /// Datagram shorter than header plus AEAD tag.
    #[error("datagram too short for header and tag")]
    HeaderTooShort,

    /// Wire version byte differs from the expected version.
    #[error("wire version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version the receiver requires.
        expected: u8,
        /// Version found on the wire.
        actual: u8,
    },

    /// Header crypto IDs differ from the session's suite IDs.
    #[error("crypto ID mismatch")]
    CryptoIdMismatch,

    /// Header session ID differs from the active session.
    #[error("session ID mismatch")]
    SessionMismatch,

    /// Header epoch is older than the receiver's epoch.
    #[error("epoch regressed: expected {expected}, got {actual}")]
    EpochRegressed {
        /// Epoch of the active context.
        expected: u8,
        /// Epoch found on the wire.
        actual: u8,
    },

    /// Header epoch is newer than the receiver's epoch.
    #[error("epoch ahead: expected {expected}, got {actual}")]
    EpochAhead {
        /// Epoch of the active context.
        expected: u8,
        /// Epoch found on the wire.
        actual: u8,
    },

    /// Sequence number already accepted or older than the window.
    #[error("replay detected")]
    Replay,

    /// AEAD tag verification failed.
    #[error("AEAD authentication failed")]
    AuthFail,
}

impl RecvError {
    /// Map the failure to the counter bucket it is charged against.
    pub fn drop_kind(&self) -> DropKind {
        match self {
            RecvError::HeaderTooShort
            | RecvError::VersionMismatch { .. }
            | RecvError::CryptoIdMismatch => DropKind::Header,
            RecvError::SessionMismatch
            | RecvError::EpochRegressed { .. }
            | RecvError::EpochAhead { .. } => DropKind::SessionEpoch,
            RecvError::Replay => DropKind::Replay,
            RecvError::AuthFail => DropKind::Auth,
        }
    }
}

/// Errors during the TCP handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A frame failed to parse. Details are logged, never sent to the peer.
    #[error("malformed handshake frame: {0}")]
    Format(&'static str),

    /// Transcript signature verification failed.
    #[error("handshake signature verification failed")]
    Verify,

    /// The drone's PSK authentication tag did not match.
    #[error("peer authentication failed")]
    Auth,

    /// Negotiated algorithm names differ from the pre-agreed suite.
    #[error("downgrade attempt: expected {expected}, negotiated {negotiated}")]
    Downgrade {
        /// Algorithm the local side was configured for.
        expected: String,
        /// Algorithm the peer offered.
        negotiated: String,
    },

    /// The handshake did not complete within its deadline.
    #[error("handshake timed out")]
    Timeout,

    /// Suite registry rejected the negotiated identifiers.
    #[error(transparent)]
    Suite(#[from] SuiteError),

    /// Primitive provider failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the control-plane state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// A rekey is already in flight; the new request is refused.
    #[error("rekey already in progress")]
    Busy,

    /// Only the GCS initiates rekeys.
    #[error("role cannot initiate a rekey")]
    NotInitiator,

    /// The requested suite is unknown or not enabled by the provider.
    #[error(transparent)]
    Suite(#[from] SuiteError),
}

/// Top-level proxy errors.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A rekey would advance the sender epoch past its maximum.
    /// Fatal to the session; the proxy exits non-zero.
    #[error("epoch would wrap past {max}; session must terminate", max = u8::MAX)]
    EpochWrapForbidden,

    /// The initial or rekey handshake failed fatally.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Suite resolution failed.
    #[error(transparent)]
    Suite(#[from] SuiteError),

    /// Configuration rejected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket-level failure outside the per-packet path.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
