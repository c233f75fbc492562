//! Per-IP connection rate limiting (C4).
//!
//! A pure sliding window: each normalized IP key tracks the timestamps of
//! its recent connection attempts and is allowed a new one only if fewer
//! than `limit` fall inside the trailing `window`. IPv4 addresses are
//! tracked individually (`/32`); IPv6 addresses are normalized to a
//! configurable prefix (default `/64`) so a single abusive /64 can't evade
//! the limiter by rotating addresses within it.

use crate::clock::Clock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Normalize an address to its rate-limit key: IPv4 addresses are kept
/// whole, IPv6 addresses are truncated to `ipv6_prefix_bits`.
fn normalize(ip: &IpAddr, ipv6_prefix_bits: u8) -> IpAddr {
    match ip {
        IpAddr::V4(_) => *ip,
        IpAddr::V6(v6) => {
            let bits = ipv6_prefix_bits.min(128);
            let mut octets = v6.octets();
            let full_bytes = (bits / 8) as usize;
            let rem_bits = bits % 8;
            for byte in octets.iter_mut().skip(full_bytes + if rem_bits > 0 { 1 } else { 0 }) {
                *byte = 0;
            }
            if rem_bits > 0 && full_bytes < octets.len() {
                let mask = !(0xFFu8 >> rem_bits);
                octets[full_bytes] &= mask;
            }
            IpAddr::V6(octets.into())
        }
    }
}

struct SlidingWindow {
    hits: Vec<Instant>,
}

impl SlidingWindow {
    fn new() -> Self {
        Self { hits: Vec::new() }
    }

    fn try_admit(&mut self, now: Instant, window: Duration, limit: usize) -> bool {
        let cutoff = now.checked_sub(window).unwrap_or(now);
        self.hits.retain(|&t| t > cutoff);
        if self.hits.len() < limit {
            self.hits.push(now);
            true
        } else {
            false
        }
    }

    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        let cutoff = now.checked_sub(window).unwrap_or(now);
        self.hits.iter().all(|&t| t <= cutoff)
    }
}

/// Sliding-window limiter keyed by normalized source IP.
pub struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, SlidingWindow>>,
    clock: Arc<dyn Clock>,
    window: Duration,
    limit: usize,
    ipv6_prefix_bits: u8,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, window: Duration, limit: usize, ipv6_prefix_bits: u8) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
            window,
            limit,
            ipv6_prefix_bits,
        }
    }

    /// Returns `true` if a new connection attempt from `ip` is admitted
    /// under the current window, recording it if so.
    pub async fn check(&self, ip: &IpAddr) -> bool {
        let key = normalize(ip, self.ipv6_prefix_bits);
        let now = self.clock.now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key).or_insert_with(SlidingWindow::new);
        let admitted = entry.try_admit(now, self.window, self.limit);
        if !admitted {
            debug!(ip = %key, "rate limit exceeded");
        }
        windows.retain(|_, w| !w.is_stale(now, self.window));
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{MockClock, SystemClock};

    fn limiter(limit: usize) -> RateLimiter {
        RateLimiter::new(Arc::new(SystemClock), Duration::from_secs(60), limit, 64)
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_blocks() {
        let rl = limiter(3);
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(rl.check(&ip).await);
        assert!(rl.check(&ip).await);
        assert!(rl.check(&ip).await);
        assert!(!rl.check(&ip).await);
    }

    #[tokio::test]
    async fn different_ips_tracked_independently() {
        let rl = limiter(1);
        let a: IpAddr = "192.0.2.1".parse().unwrap();
        let b: IpAddr = "192.0.2.2".parse().unwrap();
        assert!(rl.check(&a).await);
        assert!(rl.check(&b).await);
        assert!(!rl.check(&a).await);
    }

    #[tokio::test]
    async fn ipv6_addresses_share_a_prefix_bucket() {
        let rl = limiter(1);
        let a: IpAddr = "2001:db8::1".parse().unwrap();
        let b: IpAddr = "2001:db8::2".parse().unwrap();
        assert!(rl.check(&a).await);
        // Same /64, so the second address hits the same bucket as the first.
        assert!(!rl.check(&b).await);
    }

    #[test]
    fn normalize_masks_ipv6_to_prefix() {
        let ip: IpAddr = "2001:db8:1234:5678::1".parse().unwrap();
        let normalized = normalize(&ip, 64);
        assert_eq!(normalized, "2001:db8:1234:5678::".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn normalize_leaves_ipv4_untouched() {
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        assert_eq!(normalize(&ip, 64), ip);
    }

    #[tokio::test]
    async fn mock_clock_drives_window_expiry_deterministically() {
        let base = Instant::now();
        let mut calls = 0u32;
        let mut clock = MockClock::new();
        clock.expect_now().returning(move || {
            calls += 1;
            if calls <= 2 {
                base
            } else {
                base + Duration::from_secs(61)
            }
        });

        let rl = RateLimiter::new(Arc::new(clock), Duration::from_secs(60), 1, 64);
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(rl.check(&ip).await, "first hit within the window is admitted");
        assert!(!rl.check(&ip).await, "second hit within the same window is blocked");
        assert!(rl.check(&ip).await, "window has elapsed by the third call");
    }
}
