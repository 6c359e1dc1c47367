// config.rs
//
// Startup configuration: host/port/whitelist/DB paths loaded from the
// environment (optionally via a `.env` file), with CLI overrides applied on
// top. Grounded on original_source's `config/settings.py` (env-driven
// settings loaded once at import time); adapted here into an explicit,
// fallible `Config::load` instead of module-level globals.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Sliding-window rate limit parameters (spec.md §4.6).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub interval: Duration,
    pub max_messages: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_messages: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub whitelist: Vec<String>,
    pub user_db: PathBuf,
    pub message_db: PathBuf,
    pub banned_user_db: PathBuf,
    pub pool_size: usize,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Loads configuration from the process environment, after attempting to
    /// populate it from a `.env` file in the current directory (a missing
    /// file is not an error - `dotenvy` just no-ops).
    pub fn load() -> Self {
        if dotenvy::dotenv().is_err() {
            log::debug!("no .env file found; using process environment only");
        }

        let host = env::var("HOST").unwrap_or_else(|_| {
            log::warn!("HOST not set, defaulting to 127.0.0.1");
            "127.0.0.1".to_string()
        });

        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(65432);

        let whitelist = match env::var("WHITELIST") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => {
                log::warn!("WHITELIST not set; all connections will be rejected until configured");
                Vec::new()
            }
        };

        let user_db = env::var("USER_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/users.json"));
        let message_db = env::var("MESSAGE_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/messages.json"));
        let banned_user_db = env::var("BANNED_USER_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/banned_users.json"));

        let pool_size = env::var("POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Self {
            host,
            port,
            whitelist,
            user_db,
            message_db,
            banned_user_db,
            pool_size,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_defaults_match_spec() {
        let cfg = RateLimitConfig::default();
        assert_eq!(cfg.interval, Duration::from_secs(10));
        assert_eq!(cfg.max_messages, 5);
    }
}
