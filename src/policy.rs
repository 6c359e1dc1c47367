// policy.rs
//
// Rate limiting and mute enforcement (spec.md §4.6). Both checks happen
// after a frame has already been read off the socket - the original
// implementation discovered that checking mute state before draining the
// socket caused buffer overrun, so the session loop always reads first.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::broadcast::Broadcaster;
use crate::connection::ConnectionHandle;
use crate::envelope::{Envelope, Flag};
use crate::rate_limiter::RateLimiter;
use crate::registry::Registry;
use crate::util::lock;

struct MuteEntry {
    until: Instant,
    warned: bool,
}

/// Username → live-mute mapping. Expired entries are purged lazily on the
/// next check for that username (spec.md §3).
pub struct MuteTable {
    entries: Mutex<HashMap<String, MuteEntry>>,
}

impl MuteTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn install(&self, username: &str, duration: Duration) {
        lock(&self.entries).insert(
            username.to_string(),
            MuteEntry {
                until: Instant::now() + duration,
                warned: false,
            },
        );
    }

    /// Returns `true` if `username` may broadcast right now. Sends one
    /// `ADMIN_MSG` warning to `handle` the first time a muted user is
    /// denied, per mute window.
    pub fn check(
        &self,
        registry: &Registry,
        rate: &RateLimiter,
        addr: SocketAddr,
        handle: &ConnectionHandle,
        username: &str,
    ) -> bool {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(username) else {
            return true;
        };

        let now = Instant::now();
        if now >= entry.until {
            entries.remove(username);
            return true;
        }

        if !entry.warned {
            let remaining = (entry.until - now).as_secs() + 1;
            entry.warned = true;
            drop(entries);
            let notice = Envelope::system(
                Flag::AdminMsg,
                format!("you are muted for {remaining} more second(s)"),
            );
            Broadcaster::new(registry, rate).send(addr, handle, &notice);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmuted_user_is_allowed() {
        let mutes = MuteTable::new();
        assert!(lock(&mutes.entries).is_empty());
    }

    #[test]
    fn install_then_immediate_check_denies() {
        let mutes = MuteTable::new();
        mutes.install("bob", Duration::from_secs(60));
        let entries = lock(&mutes.entries);
        let entry = entries.get("bob").unwrap();
        assert!(entry.until > Instant::now());
        assert!(!entry.warned);
    }
}
