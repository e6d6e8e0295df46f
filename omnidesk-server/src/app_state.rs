use std::sync::Arc;

use shared::config::server::{Config, Profile};
use sqlx::PgPool;

use crate::{
    auth::session::{PgSessionStore, SessionStore},
    services::{
        change_notifier::ChangeNotifier, notification_hub::NotificationHub,
        query_cache::ReadThroughCache,
    },
};

/// State shared by every route: configuration, the database pool, and the
/// process-wide realtime hub and query cache.
#[derive(Clone, Debug)]
pub struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) pool: Option<PgPool>,
    pub(crate) sessions: Option<Arc<dyn SessionStore>>,
    pub(crate) hub: Arc<NotificationHub>,
    pub(crate) cache: Arc<ReadThroughCache>,
}

impl AppState {
    /// Builds state from configuration. A pool, when given, also backs the
    /// session store.
    #[must_use]
    pub fn new(config: Arc<Config>, pool: Option<PgPool>) -> Self {
        let sessions = pool
            .clone()
            .map(|pool| Arc::new(PgSessionStore::new(pool)) as Arc<dyn SessionStore>);

        Self {
            hub: Arc::new(NotificationHub::from_config(&config.realtime)),
            cache: Arc::new(ReadThroughCache::from_config(&config.cache)),
            config,
            pool,
            sessions,
        }
    }

    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ReadThroughCache> {
        &self.cache
    }

    #[must_use]
    pub fn notifier(&self) -> ChangeNotifier {
        ChangeNotifier::new(Arc::clone(&self.hub), Arc::clone(&self.cache))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(Config::default_for_profile(Profile::Test)), None)
    }
}
