// context.rs
//
// Bundles every shared table behind the `Arc` the acceptor hands to each
// session thread. Individual components (Registry, stores, policy tables)
// stay independent units; this is just the dependency-injection bag that
// lets session.rs and admin.rs reach all of them without a global.
use std::sync::Arc;

use crate::config::Config;
use crate::policy::MuteTable;
use crate::rate_limiter::RateLimiter;
use crate::registry::Registry;
use crate::store::{BanStore, MessageStore, UserStore};

pub struct ServerContext {
    pub config: Arc<Config>,
    pub registry: Registry,
    pub users: UserStore,
    pub messages: MessageStore,
    pub bans: BanStore,
    pub mutes: MuteTable,
    pub rate: RateLimiter,
}

impl ServerContext {
    pub fn new(config: Arc<Config>) -> Self {
        let users = UserStore::load(&config.user_db);
        let messages = MessageStore::load(&config.message_db);
        let bans = BanStore::load(&config.banned_user_db);
        let rate = RateLimiter::new(config.rate_limit);

        Self {
            config,
            registry: Registry::new(),
            users,
            messages,
            bans,
            mutes: MuteTable::new(),
            rate,
        }
    }
}
