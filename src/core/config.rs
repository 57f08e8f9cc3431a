//! Immutable proxy configuration.
//!
//! A [`Config`] is constructed once at startup, from built-in defaults
//! overridden by environment variables. The data path never reads the
//! environment.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use thiserror::Error;
use zeroize::Zeroizing;

use super::constants::{DEFAULT_REPLAY_WINDOW, DEFAULT_WIRE_VERSION, PSK_LEN};

/// Configuration parse failure.
#[derive(Debug, Error)]
#[error("invalid {key}: {reason}")]
pub struct ConfigError {
    /// Environment key that failed to parse.
    pub key: &'static str,
    /// Human-readable reason.
    pub reason: String,
}

/// All recognized proxy options.
#[derive(Clone)]
pub struct Config {
    /// Wire version byte emitted and required on every packet.
    pub wire_version: u8,
    /// Port the GCS listens on and the drone connects to for handshakes.
    pub tcp_handshake_port: u16,
    /// Encrypted UDP listen port on the GCS side.
    pub udp_gcs_rx: u16,
    /// Encrypted UDP listen port on the drone side.
    pub udp_drone_rx: u16,
    /// Address of the GCS host.
    pub gcs_host: IpAddr,
    /// Address of the drone host.
    pub drone_host: IpAddr,
    /// GCS local app port the proxy reads plaintext from.
    pub gcs_plaintext_tx: u16,
    /// GCS local app port the proxy delivers plaintext to.
    pub gcs_plaintext_rx: u16,
    /// Drone local app port the proxy reads plaintext from.
    pub drone_plaintext_tx: u16,
    /// Drone local app port the proxy delivers plaintext to.
    pub drone_plaintext_rx: u16,
    /// Sliding replay window width in sequence numbers.
    pub replay_window: u32,
    /// Enable the 0x01/0x02 packet-type prefix inside the AEAD plaintext.
    pub enable_packet_type: bool,
    /// Pin the encrypted peer address after the first successful decrypt.
    pub strict_udp_peer_match: bool,
    /// Handshake rate limiter bucket capacity.
    pub handshake_rl_burst: u32,
    /// Handshake rate limiter refill rate, tokens per second.
    pub handshake_rl_refill_per_sec: f64,
    /// 32-byte pre-shared key authenticating the drone.
    pub drone_psk: Zeroizing<[u8; PSK_LEN]>,
    /// Optional DSCP value (0-63) applied to the encrypted socket.
    pub encrypted_dscp: Option<u8>,
    /// Deadline for the initial handshake.
    pub handshake_timeout: Duration,
    /// Deadline for a rekey handshake worker.
    pub rekey_handshake_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wire_version: DEFAULT_WIRE_VERSION,
            tcp_handshake_port: 46000,
            udp_gcs_rx: 46011,
            udp_drone_rx: 46012,
            gcs_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            drone_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            gcs_plaintext_tx: 47001,
            gcs_plaintext_rx: 47002,
            drone_plaintext_tx: 47003,
            drone_plaintext_rx: 47004,
            replay_window: DEFAULT_REPLAY_WINDOW,
            enable_packet_type: true,
            strict_udp_peer_match: true,
            handshake_rl_burst: 5,
            handshake_rl_refill_per_sec: 1.0,
            drone_psk: Zeroizing::new([0u8; PSK_LEN]),
            encrypted_dscp: None,
            handshake_timeout: Duration::from_secs(30),
            rekey_handshake_timeout: Duration::from_secs(20),
        }
    }
}

impl Config {
    /// Build a configuration from defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = read("WIRE_VERSION")? {
            cfg.wire_version = parse("WIRE_VERSION", &v)?;
        }
        if let Some(v) = read("TCP_HANDSHAKE_PORT")? {
            cfg.tcp_handshake_port = parse("TCP_HANDSHAKE_PORT", &v)?;
        }
        if let Some(v) = read("UDP_GCS_RX")? {
            cfg.udp_gcs_rx = parse("UDP_GCS_RX", &v)?;
        }
        if let Some(v) = read("UDP_DRONE_RX")? {
            cfg.udp_drone_rx = parse("UDP_DRONE_RX", &v)?;
        }
        if let Some(v) = read("GCS_HOST")? {
            cfg.gcs_host = parse("GCS_HOST", &v)?;
        }
        if let Some(v) = read("DRONE_HOST")? {
            cfg.drone_host = parse("DRONE_HOST", &v)?;
        }
        if let Some(v) = read("GCS_PLAINTEXT_TX")? {
            cfg.gcs_plaintext_tx = parse("GCS_PLAINTEXT_TX", &v)?;
        }
        if let Some(v) = read("GCS_PLAINTEXT_RX")? {
            cfg.gcs_plaintext_rx = parse("GCS_PLAINTEXT_RX", &v)?;
        }
        if let Some(v) = read("DRONE_PLAINTEXT_TX")? {
            cfg.drone_plaintext_tx = parse("DRONE_PLAINTEXT_TX", &v)?;
        }
        if let Some(v) = read("DRONE_PLAINTEXT_RX")? {
            cfg.drone_plaintext_rx = parse("DRONE_PLAINTEXT_RX", &v)?;
        }
        if let Some(v) = read("REPLAY_WINDOW")? {
            cfg.replay_window = parse("REPLAY_WINDOW", &v)?;
        }
        if let Some(v) = read("ENABLE_PACKET_TYPE")? {
            cfg.enable_packet_type = parse_bool("ENABLE_PACKET_TYPE", &v)?;
        }
        if let Some(v) = read("STRICT_UDP_PEER_MATCH")? {
            cfg.strict_udp_peer_match = parse_bool("STRICT_UDP_PEER_MATCH", &v)?;
        }
        if let Some(v) = read("HANDSHAKE_RL_BURST")? {
            cfg.handshake_rl_burst = parse("HANDSHAKE_RL_BURST", &v)?;
        }
        if let Some(v) = read("HANDSHAKE_RL_REFILL_PER_SEC")? {
            cfg.handshake_rl_refill_per_sec = parse("HANDSHAKE_RL_REFILL_PER_SEC", &v)?;
        }
        if let Some(v) = read("DRONE_PSK")? {
            cfg.drone_psk = parse_psk(&v)?;
        }
        if let Some(v) = read("ENCRYPTED_DSCP")? {
            let dscp: u8 = parse("ENCRYPTED_DSCP", &v)?;
            if dscp > 63 {
                return Err(ConfigError {
                    key: "ENCRYPTED_DSCP",
                    reason: format!("{dscp} out of range 0-63"),
                });
            }
            cfg.encrypted_dscp = Some(dscp);
        }
        if let Some(v) = read("REKEY_HANDSHAKE_TIMEOUT")? {
            let secs: f64 = parse("REKEY_HANDSHAKE_TIMEOUT", &v)?;
            cfg.rekey_handshake_timeout = Duration::from_secs_f64(secs);
        }

        Ok(cfg)
    }

    /// True if the PSK was never configured (all zero bytes).
    pub fn psk_is_default(&self) -> bool {
        self.drone_psk.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("wire_version", &self.wire_version)
            .field("tcp_handshake_port", &self.tcp_handshake_port)
            .field("udp_gcs_rx", &self.udp_gcs_rx)
            .field("udp_drone_rx", &self.udp_drone_rx)
            .field("gcs_host", &self.gcs_host)
            .field("drone_host", &self.drone_host)
            .field("replay_window", &self.replay_window)
            .field("enable_packet_type", &self.enable_packet_type)
            .field("strict_udp_peer_match", &self.strict_udp_peer_match)
            .field("drone_psk", &"[redacted]")
            .field("encrypted_dscp", &self.encrypted_dscp)
            .finish_non_exhaustive()
    }
}

fn read(key: &'static str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if v.is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError {
            key,
            reason: e.to_string(),
        }),
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError {
        key,
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError {
            key,
            reason: format!("expected boolean, got {other:?}"),
        }),
    }
}

/// Decode a 64-hex-char PSK into its 32 bytes.
pub fn parse_psk(value: &str) -> Result<Zeroizing<[u8; PSK_LEN]>, ConfigError> {
    let bytes = hex::decode(value.trim()).map_err(|e| ConfigError {
        key: "DRONE_PSK",
        reason: e.to_string(),
    })?;
    if bytes.len() != PSK_LEN {
        return Err(ConfigError {
            key: "DRONE_PSK",
            reason: format!("must decode to {PSK_LEN} bytes, got {}", bytes.len()),
        });
    }
    let mut psk = Zeroizing::new([0u8; PSK_LEN]);
    psk.copy_from_slice(&bytes);
    Ok(psk)
}
