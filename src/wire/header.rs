//! Encrypted datagram header.
//!
//! Wire format (22 bytes, network byte order), also the AEAD associated
//! data:
//!
//! ```text
//! +---------+--------+-----------+--------+-----------+------------+----------+-------+
//! | version | kem_id | kem_param | sig_id | sig_param | session_id | seq      | epoch |
//! | 1 byte  | 1 byte | 1 byte    | 1 byte | 1 byte    | 8 bytes    | 8 BE     | 1 byte|
//! +---------+--------+-----------+--------+-----------+------------+----------+-------+
//! ```

use crate::core::constants::{HEADER_LEN, SESSION_ID_LEN};

/// The four suite ID bytes carried in every header.
///
/// They come from the negotiated suite record, never from configuration, so
/// a header claiming a different suite is rejected before any AEAD work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoIds {
    /// KEM family.
    pub kem_id: u8,
    /// KEM parameter set.
    pub kem_param: u8,
    /// Signature family.
    pub sig_id: u8,
    /// Signature parameter set.
    pub sig_param: u8,
}

impl From<(u8, u8, u8, u8)> for CryptoIds {
    fn from((kem_id, kem_param, sig_id, sig_param): (u8, u8, u8, u8)) -> Self {
        Self { kem_id, kem_param, sig_id, sig_param }
    }
}

/// Parsed header of an encrypted datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    /// Wire version byte.
    pub version: u8,
    /// Suite identity bytes.
    pub ids: CryptoIds,
    /// Session ID minted at handshake.
    pub session_id: [u8; SESSION_ID_LEN],
    /// Per-direction monotonic sequence number.
    pub seq: u64,
    /// Rekey epoch.
    pub epoch: u8,
}

impl WireHeader {
    /// Serialize to the fixed 22-byte wire layout.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.ids.kem_id;
        buf[2] = self.ids.kem_param;
        buf[3] = self.ids.sig_id;
        buf[4] = self.ids.sig_param;
        buf[5..13].copy_from_slice(&self.session_id);
        buf[13..21].copy_from_slice(&self.seq.to_be_bytes());
        buf[21] = self.epoch;
        buf
    }

    /// Parse the leading header bytes. Returns `None` on short input.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let mut session_id = [0u8; SESSION_ID_LEN];
        session_id.copy_from_slice(&bytes[5..13]);
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&bytes[13..21]);
        Some(Self {
            version: bytes[0],
            ids: CryptoIds {
                kem_id: bytes[1],
                kem_param: bytes[2],
                sig_id: bytes[3],
                sig_param: bytes[4],
            },
            session_id,
            seq: u64::from_be_bytes(seq_bytes),
            epoch: bytes[21],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = WireHeader {
            version: 1,
            ids: CryptoIds::from((1, 2, 1, 2)),
            session_id: [0xAA; SESSION_ID_LEN],
            seq: 0xDEADBEEFCAFEBABE,
            epoch: 7,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(WireHeader::parse(&bytes), Some(header));
    }

    #[test]
    fn test_parse_short_input() {
        assert_eq!(WireHeader::parse(&[0u8; HEADER_LEN - 1]), None);
        assert_eq!(WireHeader::parse(&[]), None);
    }

    #[test]
    fn test_seq_is_big_endian() {
        let header = WireHeader {
            version: 1,
            ids: CryptoIds::from((1, 1, 1, 1)),
            session_id: [0; SESSION_ID_LEN],
            seq: 0x0102030405060708,
            epoch: 0,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[13..21], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
