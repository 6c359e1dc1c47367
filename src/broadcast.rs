// broadcast.rs
//
// Fan-out sends, active-user announcements, per-client send serialization
// (spec.md §4.5). The registry lock is held only for the snapshot; the
// blocking write happens with no lock held beyond the target connection's
// own write mutex (spec.md §5).
use std::net::SocketAddr;

use crate::connection::ConnectionHandle;
use crate::envelope::{encode, now_stamp, Envelope, Flag};
use crate::rate_limiter::RateLimiter;
use crate::registry::Registry;
use crate::store::MessageStore;

pub struct Broadcaster<'a> {
    registry: &'a Registry,
    rate: &'a RateLimiter,
}

impl<'a> Broadcaster<'a> {
    pub fn new(registry: &'a Registry, rate: &'a RateLimiter) -> Self {
        Self { registry, rate }
    }

    /// Sends one envelope to one connection. A failing send is isolated to
    /// that recipient: it is logged, the connection is dropped from the
    /// registry and rate table, and the error is never propagated to the
    /// caller (spec.md §4.5, §7).
    pub fn send(&self, addr: SocketAddr, handle: &ConnectionHandle, envelope: &Envelope) {
        let bytes = match encode(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("failed to encode envelope for {addr}: {e}");
                return;
            }
        };

        if let Err(e) = handle.send_bytes(&bytes) {
            log::warn!("send to {addr} failed, dropping connection: {e}");
            handle.shutdown();
            self.registry.remove(addr);
            self.rate.remove(addr);
        }
    }

    /// Snapshots the registry, then fans `envelope` out to every member
    /// other than `skip`. User chat is appended to the message log before
    /// the fan-out begins (spec.md §4.5).
    pub fn broadcast(&self, messages: &MessageStore, envelope: &Envelope, skip: Option<SocketAddr>) {
        if envelope.flag == Flag::Chat && !envelope.sender.is_empty() {
            let mut stamped = envelope.clone();
            stamped.timestamp = now_stamp();
            messages.append(stamped);
        }

        for (addr, handle) in self.registry.snapshot() {
            if Some(addr) == skip {
                continue;
            }
            self.send(addr, &handle, envelope);
        }
    }

    /// Composes a `USER_LIST_UPDATE` envelope from the current registry
    /// order and broadcasts it to everyone.
    pub fn announce_active_users(&self, messages: &MessageStore) {
        let users = self.registry.active_usernames().join(",");
        let envelope = Envelope::system(Flag::UserListUpdate, users);
        self.broadcast(messages, &envelope, None);
    }
}
