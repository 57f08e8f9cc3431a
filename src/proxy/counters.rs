//! Proxy packet counters and the final report snapshot.

use serde::Serialize;

use crate::control::RekeyStats;
use crate::core::DropKind;

/// Monotonic per-proxy counters, owned by the data loop.
#[derive(Debug, Default)]
pub struct ProxyCounters {
    /// Plaintext packets read from the local app.
    pub ptx_in: u64,
    /// Plaintext packets delivered to the local app.
    pub ptx_out: u64,
    /// Encrypted packets received from the peer.
    pub enc_in: u64,
    /// Encrypted packets sent to the peer.
    pub enc_out: u64,
    /// Total dropped packets.
    pub drops: u64,
    /// Replay-window rejections.
    pub drop_replay: u64,
    /// AEAD tag failures.
    pub drop_auth: u64,
    /// Header shape/version/crypto-ID rejections.
    pub drop_header: u64,
    /// Session or epoch mismatches.
    pub drop_session_epoch: u64,
    /// Encrypted datagrams from an unexpected source address.
    pub drop_src_addr: u64,
    /// Everything else.
    pub drop_other: u64,
}

impl ProxyCounters {
    /// Charge one drop against its classified bucket.
    pub fn record_drop(&mut self, kind: DropKind) {
        self.drops += 1;
        match kind {
            DropKind::Replay => self.drop_replay += 1,
            DropKind::Auth => self.drop_auth += 1,
            DropKind::Header => self.drop_header += 1,
            DropKind::SessionEpoch => self.drop_session_epoch += 1,
            DropKind::SrcAddr => self.drop_src_addr += 1,
            DropKind::Other => self.drop_other += 1,
        }
    }

    /// Produce the final report, merging in the control-plane rekey stats.
    pub fn snapshot(&self, rekey: &RekeyStats) -> CountersSnapshot {
        CountersSnapshot {
            ptx_in: self.ptx_in,
            ptx_out: self.ptx_out,
            enc_in: self.enc_in,
            enc_out: self.enc_out,
            drops: self.drops,
            drop_replay: self.drop_replay,
            drop_auth: self.drop_auth,
            drop_header: self.drop_header,
            drop_session_epoch: self.drop_session_epoch,
            drop_src_addr: self.drop_src_addr,
            drop_other: self.drop_other,
            rekeys_ok: rekey.rekeys_ok,
            rekeys_fail: rekey.rekeys_fail,
            last_rekey_ms: rekey.last_rekey_ms,
            last_rekey_suite: rekey.last_rekey_suite.clone().unwrap_or_default(),
        }
    }
}

/// Immutable counters report returned on proxy exit.
#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    /// Plaintext packets read from the local app.
    pub ptx_in: u64,
    /// Plaintext packets delivered to the local app.
    pub ptx_out: u64,
    /// Encrypted packets received from the peer.
    pub enc_in: u64,
    /// Encrypted packets sent to the peer.
    pub enc_out: u64,
    /// Total dropped packets.
    pub drops: u64,
    /// Replay-window rejections.
    pub drop_replay: u64,
    /// AEAD tag failures.
    pub drop_auth: u64,
    /// Header shape/version/crypto-ID rejections.
    pub drop_header: u64,
    /// Session or epoch mismatches.
    pub drop_session_epoch: u64,
    /// Encrypted datagrams from an unexpected source address.
    pub drop_src_addr: u64,
    /// Everything else.
    pub drop_other: u64,
    /// Successful rekeys.
    pub rekeys_ok: u64,
    /// Failed or refused rekeys.
    pub rekeys_fail: u64,
    /// Duration of the last successful rekey handshake, milliseconds.
    pub last_rekey_ms: u64,
    /// Suite installed by the last successful rekey, empty if none.
    pub last_rekey_suite: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_classification() {
        let mut counters = ProxyCounters::default();
        counters.record_drop(DropKind::Replay);
        counters.record_drop(DropKind::Replay);
        counters.record_drop(DropKind::Auth);
        counters.record_drop(DropKind::SrcAddr);
        assert_eq!(counters.drops, 4);
        assert_eq!(counters.drop_replay, 2);
        assert_eq!(counters.drop_auth, 1);
        assert_eq!(counters.drop_src_addr, 1);
        assert_eq!(counters.drop_header, 0);
    }

    #[test]
    fn test_snapshot_merges_rekey_stats() {
        let mut counters = ProxyCounters::default();
        counters.ptx_in = 10;
        counters.enc_out = 10;
        let rekey = RekeyStats {
            rekeys_ok: 1,
            rekeys_fail: 2,
            last_rekey_ms: 150,
            last_rekey_suite: Some("cs-mlkem1024-chacha20poly1305-mldsa87".into()),
        };
        let snap = counters.snapshot(&rekey);
        assert_eq!(snap.ptx_in, 10);
        assert_eq!(snap.rekeys_ok, 1);
        assert_eq!(snap.last_rekey_suite, "cs-mlkem1024-chacha20poly1305-mldsa87");

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["enc_out"], 10);
        assert_eq!(json["rekeys_fail"], 2);
    }
}
