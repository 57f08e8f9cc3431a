//! Protocol constants for the pqlink wire format and handshake.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Encrypted datagram header size:
/// version + four crypto ID bytes + session_id + seq + epoch.
pub const HEADER_LEN: usize = 1 + 4 + SESSION_ID_LEN + 8 + 1;

/// AEAD authentication tag size (identical for all registered AEADs).
pub const AEAD_TAG_LEN: usize = 16;

/// Session ID size minted by the GCS during handshake.
pub const SESSION_ID_LEN: usize = 8;

/// Random challenge carried in the `ServerHello`.
pub const CHALLENGE_LEN: usize = 8;

/// Per-direction AEAD key size.
pub const SESSION_KEY_LEN: usize = 32;

/// Pre-shared key size (drone mutual authentication).
pub const PSK_LEN: usize = 32;

/// Largest datagram the proxy will read from either UDP socket.
pub const MAX_DATAGRAM: usize = 2048;

/// Highest epoch value; a rekey that would pass it is fatal.
pub const MAX_EPOCH: u8 = u8::MAX;

// =============================================================================
// PACKET TYPE PREFIX (inside the AEAD plaintext, when enabled)
// =============================================================================

/// Application data destined for the local plaintext port.
pub const PACKET_TYPE_DATA: u8 = 0x01;

/// In-band control-plane message (JSON).
pub const PACKET_TYPE_CONTROL: u8 = 0x02;

// =============================================================================
// HANDSHAKE DOMAIN SEPARATION
// =============================================================================

/// Domain separator inside the signed `ServerHello` transcript.
pub const TRANSCRIPT_DOMAIN: &[u8] = b"|pq-drone-gcs:v1|";

/// HKDF salt for the transport key schedule.
pub const HKDF_SALT: &[u8] = b"pq-drone-gcs|hkdf|v1";

/// HKDF info prefix; session id and negotiated names are appended.
pub const HKDF_INFO_PREFIX: &[u8] = b"pq-drone-gcs:kdf:v1|";

// =============================================================================
// HANDSHAKE FRAMING LIMITS
// =============================================================================

/// Upper bound on a length-prefixed `ServerHello` frame.
/// SLH-DSA signatures dominate; the largest legitimate hello is well under this.
pub const MAX_HELLO_LEN: usize = 128 * 1024;

/// Upper bound on the KEM ciphertext in the client reply.
pub const MAX_KEM_CT_LEN: usize = 16 * 1024;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default sliding replay window width in sequence numbers.
pub const DEFAULT_REPLAY_WINDOW: u32 = 1024;

/// Default wire version byte.
pub const DEFAULT_WIRE_VERSION: u8 = 1;
