// rate_limiter.rs
//
// Sliding-window rate limiting (spec.md §4.6). Per-connection timestamp
// sequences are only ever touched by their owning session thread, so no
// lock is needed on the deque itself; the outer map is lock-guarded only
// for insert/remove (spec.md §5).
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::broadcast::Broadcaster;
use crate::config::RateLimitConfig;
use crate::connection::ConnectionHandle;
use crate::envelope::{Envelope, Flag};
use crate::registry::Registry;
use crate::util::lock;

pub struct RateLimiter {
    interval: Duration,
    max_messages: usize,
    history: Mutex<HashMap<SocketAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            interval: config.interval,
            max_messages: config.max_messages,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `addr` may send right now, recording the send if
    /// so. Sends one `ADMIN_MSG` warning on denial.
    pub fn check(&self, registry: &Registry, addr: SocketAddr, handle: &ConnectionHandle) -> bool {
        let now = Instant::now();
        let mut history = lock(&self.history);
        let window = history.entry(addr).or_default();

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) > self.interval {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.max_messages {
            drop(history);
            let notice = Envelope::system(
                Flag::AdminMsg,
                format!(
                    "rate limit: max {} messages every {}s",
                    self.max_messages,
                    self.interval.as_secs()
                ),
            );
            Broadcaster::new(registry, self).send(addr, handle, &notice);
            return false;
        }

        window.push_back(now);
        true
    }

    /// A connection only ever appears in this table while it is in the
    /// registry (spec.md §3's invariant); removal keeps that true.
    pub fn remove(&self, addr: SocketAddr) {
        lock(&self.history).remove(&addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_starts_empty_for_new_connection() {
        let limiter = RateLimiter::new(RateLimitConfig {
            interval: Duration::from_secs(10),
            max_messages: 5,
        });
        assert!(lock(&limiter.history).is_empty());
    }

    #[test]
    fn remove_clears_the_window() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        lock(&limiter.history).insert(addr, VecDeque::from([Instant::now()]));
        limiter.remove(addr);
        assert!(!lock(&limiter.history).contains_key(&addr));
    }
}
