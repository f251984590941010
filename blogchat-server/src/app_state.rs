use std::sync::Arc;

use shared::config::server::Config;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::token::TokenVerifier,
    chat::Hub,
    services::{
        BanService, ChatService, IpGuard, WhitelistService,
        clock::{Clock, SystemClock},
        ip_guard::GuardSettings,
    },
    store::Stores,
};

/// Everything the handlers share. Built once at start-up; the hub and the
/// gate live here rather than in globals.
#[derive(Clone, Debug)]
pub struct AppState {
    pub(crate) pool: Option<PgPool>,
    pub(crate) config: Arc<Config>,
    pub(crate) stores: Stores,
    pub(crate) hub: Arc<Hub>,
    pub(crate) ip_guard: Arc<IpGuard>,
    pub(crate) chat: ChatService,
    pub(crate) bans: BanService,
    pub(crate) whitelist: WhitelistService,
    pub(crate) tokens: TokenVerifier,
    pub(crate) shutdown: CancellationToken,
}

impl AppState {
    /// Wires stores, hub and gate. Must be called inside a tokio runtime
    /// because the hub loop is spawned here.
    pub fn new(config: Arc<Config>, pool: Option<PgPool>, clock: Arc<dyn Clock>) -> Self {
        let stores = match &pool {
            Some(pool) => Stores::postgres(pool.clone()),
            None => Stores::memory(clock.clone()),
        };
        Self::with_stores(config, pool, stores, clock)
    }

    pub fn with_stores(
        config: Arc<Config>,
        pool: Option<PgPool>,
        stores: Stores,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hub = Hub::start(config.chat.clone(), stores.chat.clone());
        let ip_guard = Arc::new(IpGuard::new(
            GuardSettings::from_config(&config.ip_guard),
            stores.bans.clone(),
            stores.whitelist.clone(),
            clock.clone(),
        ));
        let chat = ChatService::new(hub.clone(), stores.clone(), clock.clone());
        let bans = BanService::new(stores.bans.clone(), ip_guard.clone(), clock.clone());
        let whitelist = WhitelistService::new(stores.whitelist.clone(), clock);
        let tokens = TokenVerifier::from_config(&config.auth);

        Self {
            pool,
            config,
            stores,
            hub,
            ip_guard,
            chat,
            bans,
            whitelist,
            tokens,
            shutdown: CancellationToken::new(),
        }
    }

    /// In-memory state with the system clock, for tests and database-less runs.
    pub fn in_memory(config: Config) -> Self {
        Self::new(Arc::new(config), None, Arc::new(SystemClock))
    }

    /// Stops background work: the gate sweeper and the hub loop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.hub.shutdown().await;
    }
}
