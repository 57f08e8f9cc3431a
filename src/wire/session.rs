//! Directional AEAD framing with anti-replay protection.
//!
//! A [`Sender`] assigns strictly increasing sequence numbers and seals each
//! datagram under a nonce derived from `(epoch, seq)`. A [`Receiver`]
//! classifies every failure before doing AEAD work where possible, enforces
//! a sliding replay window anchored at the highest accepted sequence number,
//! and delivers each `(epoch, seq)` at most once.

use crate::core::constants::{AEAD_TAG_LEN, HEADER_LEN, SESSION_ID_LEN};
use crate::core::{RecvError, SendError};
use crate::crypto::aead::{AeadAlgorithm, SessionKey};

use super::header::{CryptoIds, WireHeader};

/// Anti-replay sliding window of configurable width.
///
/// A sequence number is in-window iff `highest - seq < width`; anything at
/// or below `highest - width` is rejected outright, and every in-window
/// number is delivered at most once via the bitmap.
pub struct ReplayWindow {
    bitmap: Vec<u64>,
    width: u64,
    highest: u64,
    initialized: bool,
}

impl ReplayWindow {
    /// Create a window of `width` sequence numbers (minimum 64).
    pub fn new(width: u32) -> Self {
        let width = u64::from(width.max(64));
        let words = width.div_ceil(64) as usize;
        Self {
            bitmap: vec![0; words],
            width,
            highest: 0,
            initialized: false,
        }
    }

    /// Highest sequence number accepted so far.
    pub fn highest(&self) -> u64 {
        self.highest
    }

    /// Check whether `seq` would be rejected, without updating state.
    pub fn is_replay(&self, seq: u64) -> bool {
        if !self.initialized || seq > self.highest {
            return false;
        }
        let diff = self.highest - seq;
        if diff >= self.width {
            return true;
        }
        self.bit(diff)
    }

    /// Record an accepted sequence number. Call only after the AEAD opened.
    pub fn record(&mut self, seq: u64) {
        if !self.initialized {
            self.highest = seq;
            self.initialized = true;
            self.set_bit(0);
            return;
        }
        if seq > self.highest {
            self.shift(seq - self.highest);
            self.highest = seq;
            self.set_bit(0);
        } else {
            let diff = self.highest - seq;
            if diff < self.width {
                self.set_bit(diff);
            }
        }
    }

    fn bit(&self, offset: u64) -> bool {
        let word = (offset / 64) as usize;
        let bit = offset % 64;
        self.bitmap[word] & (1 << bit) != 0
    }

    fn set_bit(&mut self, offset: u64) {
        let word = (offset / 64) as usize;
        let bit = offset % 64;
        self.bitmap[word] |= 1 << bit;
    }

    /// Shift the bitmap towards older offsets when the anchor advances.
    fn shift(&mut self, by: u64) {
        if by >= self.width {
            self.bitmap.fill(0);
            return;
        }
        let words = self.bitmap.len();
        let shift_words = (by / 64) as usize;
        let shift_bits = (by % 64) as u32;

        if shift_words > 0 {
            for i in (shift_words..words).rev() {
                self.bitmap[i] = self.bitmap[i - shift_words];
            }
            for word in self.bitmap.iter_mut().take(shift_words) {
                *word = 0;
            }
        }
        if shift_bits > 0 {
            let mut carry = 0u64;
            for word in self.bitmap.iter_mut() {
                let new_carry = *word >> (64 - shift_bits);
                *word = (*word << shift_bits) | carry;
                carry = new_carry;
            }
        }
    }
}

/// Encrypting half of a session direction.
pub struct Sender {
    version: u8,
    ids: CryptoIds,
    session_id: [u8; SESSION_ID_LEN],
    epoch: u8,
    seq: u64,
    algorithm: AeadAlgorithm,
    key: SessionKey,
}

impl Sender {
    /// Create a sender starting at sequence zero.
    pub fn new(
        version: u8,
        ids: CryptoIds,
        session_id: [u8; SESSION_ID_LEN],
        epoch: u8,
        algorithm: AeadAlgorithm,
        key: SessionKey,
    ) -> Self {
        Self {
            version,
            ids,
            session_id,
            epoch,
            seq: 0,
            algorithm,
            key,
        }
    }

    /// Current epoch.
    pub fn epoch(&self) -> u8 {
        self.epoch
    }

    /// Next sequence number to be assigned.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[cfg(test)]
    pub(crate) fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    /// Seal `plaintext` into a wire datagram: header followed by
    /// ciphertext-with-tag, with the header as AAD.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SendError> {
        if self.seq == u64::MAX {
            // One (epoch, seq) pair per key, ever. Refuse rather than reuse.
            return Err(SendError::SeqExhausted);
        }
        let header = WireHeader {
            version: self.version,
            ids: self.ids,
            session_id: self.session_id,
            seq: self.seq,
            epoch: self.epoch,
        };
        let aad = header.to_bytes();
        let ciphertext = self
            .algorithm
            .seal(&self.key, self.epoch, self.seq, &aad, plaintext)
            .map_err(|_| SendError::EncryptFailed)?;

        let mut wire = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        wire.extend_from_slice(&aad);
        wire.extend_from_slice(&ciphertext);
        self.seq += 1;
        Ok(wire)
    }
}

/// Decrypting half of a session direction.
pub struct Receiver {
    version: u8,
    ids: CryptoIds,
    session_id: [u8; SESSION_ID_LEN],
    epoch: u8,
    window: ReplayWindow,
    algorithm: AeadAlgorithm,
    key: SessionKey,
}

impl Receiver {
    /// Create a receiver with a fresh replay window.
    pub fn new(
        version: u8,
        ids: CryptoIds,
        session_id: [u8; SESSION_ID_LEN],
        epoch: u8,
        algorithm: AeadAlgorithm,
        key: SessionKey,
        window_width: u32,
    ) -> Self {
        Self {
            version,
            ids,
            session_id,
            epoch,
            window: ReplayWindow::new(window_width),
            algorithm,
            key,
        }
    }

    /// Current epoch.
    pub fn epoch(&self) -> u8 {
        self.epoch
    }

    /// Highest accepted sequence number.
    pub fn highest_seq(&self) -> u64 {
        self.window.highest()
    }

    /// Open a wire datagram, classifying every rejection.
    ///
    /// Checks run cheapest-first: header shape, version, crypto IDs,
    /// session, epoch, replay window, and only then the AEAD tag. The
    /// window is updated after a successful open so forged packets cannot
    /// poison it.
    pub fn decrypt(&mut self, wire: &[u8]) -> Result<Vec<u8>, RecvError> {
        if wire.len() < HEADER_LEN + AEAD_TAG_LEN {
            return Err(RecvError::HeaderTooShort);
        }
        let header = WireHeader::parse(wire).ok_or(RecvError::HeaderTooShort)?;

        if header.version != self.version {
            return Err(RecvError::VersionMismatch {
                expected: self.version,
                actual: header.version,
            });
        }
        if header.ids != self.ids {
            return Err(RecvError::CryptoIdMismatch);
        }
        if header.session_id != self.session_id {
            return Err(RecvError::SessionMismatch);
        }
        if header.epoch < self.epoch {
            return Err(RecvError::EpochRegressed {
                expected: self.epoch,
                actual: header.epoch,
            });
        }
        if header.epoch > self.epoch {
            return Err(RecvError::EpochAhead {
                expected: self.epoch,
                actual: header.epoch,
            });
        }
        if self.window.is_replay(header.seq) {
            return Err(RecvError::Replay);
        }

        let aad = &wire[..HEADER_LEN];
        let plaintext = self
            .algorithm
            .open(&self.key, header.epoch, header.seq, aad, &wire[HEADER_LEN..])
            .map_err(|_| RecvError::AuthFail)?;

        self.window.record(header.seq);
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::SESSION_KEY_LEN;

    fn pair(window: u32) -> (Sender, Receiver) {
        let ids = CryptoIds::from((1, 2, 1, 2));
        let session_id = [0xAA; SESSION_ID_LEN];
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_LEN]);
        let sender = Sender::new(1, ids, session_id, 0, AeadAlgorithm::Aes256Gcm, key.clone());
        let receiver = Receiver::new(1, ids, session_id, 0, AeadAlgorithm::Aes256Gcm, key, window);
        (sender, receiver)
    }

    #[test]
    fn test_roundtrip_in_order() {
        let (mut tx, mut rx) = pair(64);
        for i in 0..5u32 {
            let msg = format!("packet{i}");
            let wire = tx.encrypt(msg.as_bytes()).unwrap();
            assert_eq!(rx.decrypt(&wire).unwrap(), msg.as_bytes());
        }
        assert_eq!(tx.seq(), 5);
        assert_eq!(rx.highest_seq(), 4);
    }

    #[test]
    fn test_out_of_order_within_window_and_replays() {
        let (mut tx, mut rx) = pair(64);
        let packets: Vec<_> = (0..8).map(|i| tx.encrypt(format!("p{i}").as_bytes()).unwrap()).collect();

        for i in [0usize, 1, 2, 3, 4] {
            rx.decrypt(&packets[i]).unwrap();
        }
        // 6, then 5 out of order, then 7
        assert_eq!(rx.decrypt(&packets[6]).unwrap(), b"p6");
        assert_eq!(rx.decrypt(&packets[5]).unwrap(), b"p5");
        assert_eq!(rx.decrypt(&packets[7]).unwrap(), b"p7");

        // duplicates are replays
        assert_eq!(rx.decrypt(&packets[0]), Err(RecvError::Replay));
        assert_eq!(rx.decrypt(&packets[5]), Err(RecvError::Replay));
    }

    #[test]
    fn test_reject_old_beyond_window() {
        let (mut tx, mut rx) = pair(64);
        let packets: Vec<_> = (0..=100).map(|i| tx.encrypt(format!("p{i}").as_bytes()).unwrap()).collect();

        // establish high water mark at 100
        assert_eq!(rx.decrypt(&packets[100]).unwrap(), b"p100");

        // 100 - 64 = 36: anything at or below is outside the window
        assert_eq!(rx.decrypt(&packets[30]), Err(RecvError::Replay));
        assert_eq!(rx.decrypt(&packets[36]), Err(RecvError::Replay));
        // 37 is still inside
        assert_eq!(rx.decrypt(&packets[37]).unwrap(), b"p37");
    }

    #[test]
    fn test_large_gap_resets_window() {
        let (mut tx, mut rx) = pair(64);
        let first = tx.encrypt(b"a").unwrap();
        rx.decrypt(&first).unwrap();

        let mut jump = None;
        for i in 1..=5000u64 {
            let wire = tx.encrypt(b"x").unwrap();
            if i == 5000 {
                jump = Some(wire);
            }
        }
        rx.decrypt(&jump.unwrap()).unwrap();
        assert_eq!(rx.highest_seq(), 5000);
        assert_eq!(rx.decrypt(&first), Err(RecvError::Replay));
    }

    #[test]
    fn test_first_packet_replay_detected() {
        let (mut tx, mut rx) = pair(64);
        let wire = tx.encrypt(b"first").unwrap();
        rx.decrypt(&wire).unwrap();
        assert_eq!(rx.decrypt(&wire), Err(RecvError::Replay));
    }

    #[test]
    fn test_classification_order() {
        let (mut tx, mut rx) = pair(64);
        let wire = tx.encrypt(b"payload").unwrap();

        // too short
        assert_eq!(rx.decrypt(&wire[..HEADER_LEN]), Err(RecvError::HeaderTooShort));

        // version mismatch
        let mut bad = wire.clone();
        bad[0] ^= 0xFF;
        assert!(matches!(rx.decrypt(&bad), Err(RecvError::VersionMismatch { .. })));

        // crypto ID mismatch beats AEAD work
        let mut bad = wire.clone();
        bad[1] ^= 0x01;
        assert_eq!(rx.decrypt(&bad), Err(RecvError::CryptoIdMismatch));

        // session mismatch
        let mut bad = wire.clone();
        bad[5] ^= 0x01;
        assert_eq!(rx.decrypt(&bad), Err(RecvError::SessionMismatch));

        // epoch ahead
        let mut bad = wire.clone();
        bad[21] = 1;
        assert!(matches!(rx.decrypt(&bad), Err(RecvError::EpochAhead { .. })));

        // tampered ciphertext fails auth
        let mut bad = wire.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        assert_eq!(rx.decrypt(&bad), Err(RecvError::AuthFail));

        // the real packet still goes through: failures never touched the window
        assert_eq!(rx.decrypt(&wire).unwrap(), b"payload");
    }

    #[test]
    fn test_epoch_regressed() {
        let ids = CryptoIds::from((1, 1, 1, 1));
        let key = SessionKey::from_bytes([9; SESSION_KEY_LEN]);
        let mut tx = Sender::new(1, ids, [1; 8], 0, AeadAlgorithm::ChaCha20Poly1305, key.clone());
        let mut rx = Receiver::new(1, ids, [1; 8], 3, AeadAlgorithm::ChaCha20Poly1305, key, 64);
        let wire = tx.encrypt(b"old epoch").unwrap();
        assert!(matches!(rx.decrypt(&wire), Err(RecvError::EpochRegressed { .. })));
    }

    #[test]
    fn test_seq_exhaustion_refuses_to_encrypt() {
        let (mut tx, _) = pair(64);
        tx.set_seq(u64::MAX);
        assert_eq!(tx.encrypt(b"x"), Err(SendError::SeqExhausted));
        // still refuses; the sender never wraps
        assert_eq!(tx.encrypt(b"x"), Err(SendError::SeqExhausted));
    }

    #[test]
    fn test_forged_packet_does_not_poison_window() {
        let (mut tx, mut rx) = pair(64);
        let wire = tx.encrypt(b"real").unwrap();

        // forge a packet claiming a huge seq with a bogus tag
        let mut forged = wire.clone();
        forged[13..21].copy_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(rx.decrypt(&forged), Err(RecvError::AuthFail));

        // the legitimate packet is still accepted
        assert_eq!(rx.decrypt(&wire).unwrap(), b"real");
    }
}
