// store.rs
//
// The three named JSON-backed tables (spec.md §4.3): users, messages, bans.
// `load`/`store` are the opaque pair the spec treats persistence as (§1 Out
// of scope); everything above that line - atomic writes, in-memory shape,
// load-failure policy - is this crate's concern.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::errors::ChatResult;
use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "user")]
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "password")]
    pub password_digest: String,
    pub role: Role,
}

/// Writes `value` to `path` as pretty JSON atomically: write to a sibling
/// `.tmp` file, then rename over the destination. Satisfies the "no partial
/// writes are observable" invariant (spec.md §3).
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> ChatResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    let data = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// In-memory user table, loaded once at startup. No operation in this
/// crate's scope mutates it (account creation is external tooling per
/// spec.md §1), so it carries no `save`.
pub struct UserStore {
    users: Mutex<HashMap<String, User>>,
}

impl UserStore {
    pub fn empty() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(users) => Self {
                    users: Mutex::new(users),
                },
                Err(e) => {
                    log::warn!("failed to parse {}: {e}, starting with no users", path.display());
                    Self::empty()
                }
            },
            Err(e) => {
                log::warn!("failed to load {}: {e}, starting with no users", path.display());
                Self::empty()
            }
        }
    }

    pub fn get(&self, username: &str) -> Option<User> {
        lock(&self.users).get(username).cloned()
    }

    pub fn is_admin(&self, username: &str) -> bool {
        matches!(self.get(username), Some(User { role: Role::Admin, .. }))
    }

    pub fn contains(&self, username: &str) -> bool {
        lock(&self.users).contains_key(username)
    }

    #[cfg(test)]
    pub fn insert_for_test(&self, username: String, user: User) {
        lock(&self.users).insert(username, user);
    }
}

/// Append-only ordered chat log. Only user-originated chat is appended -
/// system/admin messages never reach `append` (callers gate on that, see
/// `broadcast::Broadcaster::broadcast`).
pub struct MessageStore {
    path: PathBuf,
    messages: Mutex<Vec<Envelope>>,
}

impl MessageStore {
    pub fn load(path: &Path) -> Self {
        let messages = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!("failed to parse {}: {e}, starting with empty log", path.display());
                Vec::new()
            }),
            Err(e) => {
                log::warn!("failed to load {}: {e}, starting with empty log", path.display());
                Vec::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            messages: Mutex::new(messages),
        }
    }

    pub fn append(&self, envelope: Envelope) {
        lock(&self.messages).push(envelope);
    }

    /// Flushes the in-memory tail to disk exactly once, per spec.md §3's
    /// shutdown invariant. Save failures are logged, never retried
    /// (spec.md §7).
    pub fn flush(&self) {
        let snapshot = lock(&self.messages).clone();
        if let Err(e) = atomic_write_json(&self.path, &snapshot) {
            log::error!("failed to flush message log to {}: {e}", self.path.display());
        }
    }

    #[cfg(test)]
    pub fn snapshot_for_test(&self) -> Vec<Envelope> {
        lock(&self.messages).clone()
    }
}

/// Set of banned usernames, persisted on every mutation (unlike the
/// message log, which only flushes at shutdown) because ban/unban is a
/// rare, deliberate admin action whose durability matters immediately.
pub struct BanStore {
    path: PathBuf,
    banned: Mutex<HashSet<String>>,
}

impl BanStore {
    pub fn load(path: &Path) -> Self {
        let banned = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<Vec<String>>(&bytes)
                .map(|v| v.into_iter().collect())
                .unwrap_or_else(|e| {
                    log::warn!("failed to parse {}: {e}, starting with no bans", path.display());
                    HashSet::new()
                }),
            Err(e) => {
                log::warn!("failed to load {}: {e}, starting with no bans", path.display());
                HashSet::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            banned: Mutex::new(banned),
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        lock(&self.banned).contains(username)
    }

    /// Returns `true` if the username was newly banned.
    pub fn ban(&self, username: &str) -> bool {
        let inserted = lock(&self.banned).insert(username.to_string());
        if inserted {
            self.save();
        }
        inserted
    }

    /// Returns `true` if the username was previously banned.
    pub fn unban(&self, username: &str) -> bool {
        let removed = lock(&self.banned).remove(username);
        if removed {
            self.save();
        }
        removed
    }

    fn save(&self) {
        let snapshot: Vec<String> = lock(&self.banned).iter().cloned().collect();
        if let Err(e) = atomic_write_json(&self.path, &snapshot) {
            log::error!("failed to save {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ban_then_unban_restores_the_ban_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bans.json");
        fs::write(&path, b"[]").unwrap();
        let bans = BanStore::load(&path);

        assert!(bans.ban("trouble"));
        assert!(bans.contains("trouble"));
        assert!(bans.unban("trouble"));
        assert!(!bans.contains("trouble"));
    }

    #[test]
    fn ban_persists_atomically_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bans.json");
        fs::write(&path, b"[]").unwrap();
        let bans = BanStore::load(&path);
        bans.ban("trouble");

        let reloaded = BanStore::load(&path);
        assert!(reloaded.contains("trouble"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_store_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let users = UserStore::load(&path);
        assert!(!users.contains("anyone"));
    }

    #[test]
    fn message_store_flush_is_atomic_and_reloadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.json");
        fs::write(&path, b"[]").unwrap();
        let store = MessageStore::load(&path);
        store.append(Envelope::chat("admin", "hi"));
        store.flush();

        let reloaded = MessageStore::load(&path);
        assert_eq!(lock(&reloaded.messages).len(), 1);
    }
}
