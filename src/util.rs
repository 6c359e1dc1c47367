// util.rs
use std::sync::{Mutex, MutexGuard};

/// Locks `mutex`, recovering the inner value on poison rather than
/// propagating a panic from one connection's thread into every other
/// connection sharing the table. Used for the hot, always-must-proceed
/// shared tables (registry, mute table, rate-limit table); stores that
/// perform real I/O use `?` against `ChatError::PoisonedLock` instead,
/// since a poisoned store genuinely means "something went wrong, stop."
pub fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
