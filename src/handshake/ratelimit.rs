//! Per-IP token bucket guarding the handshake accept path.
//!
//! Rejected peers cost one accept and one written byte, never any
//! CPU-bound cryptography.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

/// Token bucket keyed by peer IP.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: HashMap<IpAddr, (f64, Instant)>,
}

impl TokenBucket {
    /// Create a bucket with `capacity` burst tokens refilled at
    /// `refill_per_sec` tokens per second.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity.max(1)),
            refill_per_sec: refill_per_sec.max(0.01),
            state: HashMap::new(),
        }
    }

    /// Spend one token for `ip` if available.
    pub fn allow(&mut self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&mut self, ip: IpAddr, now: Instant) -> bool {
        let (tokens, last) = self
            .state
            .get(&ip)
            .copied()
            .unwrap_or((self.capacity, now));
        let elapsed = now.saturating_duration_since(last).as_secs_f64();
        let tokens = (tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if tokens >= 1.0 {
            self.state.insert(ip, (tokens - 1.0, now));
            true
        } else {
            self.state.insert(ip, (tokens, now));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_burst_then_reject() {
        let mut bucket = TokenBucket::new(5, 1.0);
        let now = Instant::now();
        let mut accepted = 0;
        for _ in 0..50 {
            if bucket.allow_at(ip(1), now) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 5);
    }

    #[test]
    fn test_refill_restores_tokens() {
        let mut bucket = TokenBucket::new(2, 1.0);
        let t0 = Instant::now();
        assert!(bucket.allow_at(ip(1), t0));
        assert!(bucket.allow_at(ip(1), t0));
        assert!(!bucket.allow_at(ip(1), t0));

        // one second refills one token
        let t1 = t0 + Duration::from_secs(1);
        assert!(bucket.allow_at(ip(1), t1));
        assert!(!bucket.allow_at(ip(1), t1));
    }

    #[test]
    fn test_buckets_are_per_ip() {
        let mut bucket = TokenBucket::new(1, 1.0);
        let now = Instant::now();
        assert!(bucket.allow_at(ip(1), now));
        assert!(!bucket.allow_at(ip(1), now));
        assert!(bucket.allow_at(ip(2), now));
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let mut bucket = TokenBucket::new(3, 1.0);
        let t0 = Instant::now();
        assert!(bucket.allow_at(ip(1), t0));

        // a long idle period never grants more than the burst capacity
        let t1 = t0 + Duration::from_secs(3600);
        let mut accepted = 0;
        for _ in 0..10 {
            if bucket.allow_at(ip(1), t1) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);
    }
}
