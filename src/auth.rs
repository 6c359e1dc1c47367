// auth.rs
//
// Credential parsing and authorization (spec.md §4.2). Password hashing
// itself is delegated to `bcrypt`, treated as the opaque `hash`/`verify`
// pair the spec allows (§1 Out of scope).
use std::net::IpAddr;

use serde::Deserialize;

use crate::envelope::Flag;
use crate::store::{Role, UserStore};

/// First frame a client sends, before admission.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Why authentication failed, carrying the flag that must be sent back to
/// the client before the socket is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Invalid,
    Banned,
    Denied,
}

impl AuthFailure {
    pub fn flag(self) -> Flag {
        match self {
            AuthFailure::Invalid => Flag::AuthInvalid,
            AuthFailure::Banned => Flag::AuthBan,
            AuthFailure::Denied => Flag::AuthDenied,
        }
    }
}

/// Exact-string membership check against the configured whitelist.
pub fn whitelisted(whitelist: &[String], addr: IpAddr) -> bool {
    whitelist.iter().any(|ip| ip == &addr.to_string())
}

/// Parses the raw credential line, checks the ban set, looks up the user,
/// and verifies the password digest. Returns the authenticated username
/// along with whether they are an admin, or the specific failure reason.
pub fn authenticate(
    raw: &[u8],
    users: &UserStore,
    is_banned: impl Fn(&str) -> bool,
) -> Result<(String, Role), AuthFailure> {
    let credentials: Credentials =
        serde_json::from_slice(raw).map_err(|_| AuthFailure::Invalid)?;

    if is_banned(&credentials.username) {
        return Err(AuthFailure::Banned);
    }

    let user = users.get(&credentials.username).ok_or(AuthFailure::Denied)?;

    let verified =
        bcrypt::verify(&credentials.password, &user.password_digest).unwrap_or(false);
    if !verified {
        return Err(AuthFailure::Denied);
    }

    Ok((credentials.username, user.role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::User;

    fn store_with(username: &str, password: &str, role: Role) -> UserStore {
        let store = UserStore::empty();
        let digest = bcrypt::hash(password, bcrypt::DEFAULT_COST).unwrap();
        store.insert_for_test(
            username.to_string(),
            User {
                password_digest: digest,
                role,
            },
        );
        store
    }

    #[test]
    fn rejects_malformed_credentials() {
        let users = UserStore::empty();
        let result = authenticate(b"not json", &users, |_| false);
        assert_eq!(result.unwrap_err(), AuthFailure::Invalid);
    }

    #[test]
    fn rejects_banned_username_before_checking_password() {
        let users = store_with("admin", "admin", Role::Admin);
        let raw = br#"{"username":"admin","password":"wrong"}"#;
        let result = authenticate(raw, &users, |name| name == "admin");
        assert_eq!(result.unwrap_err(), AuthFailure::Banned);
    }

    #[test]
    fn rejects_unknown_user() {
        let users = UserStore::empty();
        let raw = br#"{"username":"ghost","password":"x"}"#;
        let result = authenticate(raw, &users, |_| false);
        assert_eq!(result.unwrap_err(), AuthFailure::Denied);
    }

    #[test]
    fn rejects_bad_password() {
        let users = store_with("admin", "admin", Role::Admin);
        let raw = br#"{"username":"admin","password":"wrong"}"#;
        let result = authenticate(raw, &users, |_| false);
        assert_eq!(result.unwrap_err(), AuthFailure::Denied);
    }

    #[test]
    fn accepts_correct_credentials() {
        let users = store_with("admin", "admin", Role::Admin);
        let raw = br#"{"username":"admin","password":"admin"}"#;
        let (username, role) = authenticate(raw, &users, |_| false).unwrap();
        assert_eq!(username, "admin");
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn whitelist_is_exact_string_match() {
        let list = vec!["127.0.0.1".to_string()];
        assert!(whitelisted(&list, "127.0.0.1".parse().unwrap()));
        assert!(!whitelisted(&list, "10.0.0.1".parse().unwrap()));
    }
}
