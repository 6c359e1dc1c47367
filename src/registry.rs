// registry.rs
//
// The concurrent client registry (spec.md §4.4): connection ↔ username
// mapping, mutated only under a brief critical section and never held
// during I/O. See DESIGN.md for how this resolves spec.md §9's re-entrant
// lock note without an actual re-entrant lock.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::connection::ConnectionHandle;
use crate::util::lock;

struct RegisteredClient {
    username: String,
    handle: Arc<ConnectionHandle>,
}

#[derive(Default)]
struct RegistryInner {
    by_addr: HashMap<SocketAddr, RegisteredClient>,
    /// Insertion order, preserved for `active_usernames`'s "stable snapshot"
    /// requirement - a plain `HashMap` has no ordering of its own.
    order: Vec<SocketAddr>,
}

pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Admits `handle` under `username`. Fails if that username is already
    /// bound to a live connection (duplicate-login rejection, spec.md §9).
    pub fn admit(&self, handle: Arc<ConnectionHandle>, username: &str) -> Result<(), ()> {
        let mut inner = lock(&self.inner);
        if inner.by_addr.values().any(|c| c.username == username) {
            return Err(());
        }
        let addr = handle.addr;
        inner.by_addr.insert(
            addr,
            RegisteredClient {
                username: username.to_string(),
                handle,
            },
        );
        inner.order.push(addr);
        Ok(())
    }

    /// Removes the entry for `addr`, if any. Idempotent: a second call
    /// after the first returns `None`.
    pub fn remove(&self, addr: SocketAddr) -> Option<(String, Arc<ConnectionHandle>)> {
        let mut inner = lock(&self.inner);
        let removed = inner.by_addr.remove(&addr)?;
        inner.order.retain(|a| *a != addr);
        Some((removed.username, removed.handle))
    }

    /// Stable, insertion-ordered snapshot of usernames for broadcast
    /// composition (spec.md §4.4).
    pub fn active_usernames(&self) -> Vec<String> {
        let inner = lock(&self.inner);
        inner
            .order
            .iter()
            .filter_map(|addr| inner.by_addr.get(addr).map(|c| c.username.clone()))
            .collect()
    }

    pub fn find_by_username(&self, username: &str) -> Option<(SocketAddr, Arc<ConnectionHandle>)> {
        let inner = lock(&self.inner);
        inner
            .by_addr
            .iter()
            .find(|(_, c)| c.username == username)
            .map(|(addr, c)| (*addr, c.handle.clone()))
    }

    pub fn is_bound(&self, username: &str) -> bool {
        lock(&self.inner).by_addr.values().any(|c| c.username == username)
    }

    /// Snapshot-then-send pattern (spec.md §4.5): iterate this, not the
    /// live table, while sending, so a send failure's removal can't
    /// invalidate an in-progress iterator.
    pub fn snapshot(&self) -> Vec<(SocketAddr, Arc<ConnectionHandle>)> {
        let inner = lock(&self.inner);
        inner
            .order
            .iter()
            .filter_map(|addr| inner.by_addr.get(addr).map(|c| (*addr, c.handle.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).by_addr.len()
    }
}
