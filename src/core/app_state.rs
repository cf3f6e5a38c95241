use std::sync::Arc;
use std::time::Duration;

use crate::browser::BrowserPool;
use crate::core::config::FetchConfig;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub http_client: reqwest::Client,
    pub browser_pool: Arc<BrowserPool>,
    pub sessions: Arc<SessionStore>,

    /// File-based config loaded from `fetchd.json` (env-var fallback for all fields).
    pub config: Arc<FetchConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}

impl AppState {
    /// Builds its own `reqwest::Client`, timed out per the loaded config, so
    /// callers don't need to load the config twice to get the timeout right.
    pub fn new() -> anyhow::Result<Self> {
        let config = crate::core::config::load_fetch_config();
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.resolve_http_timeout_secs()))
            .build()?;
        let browser_pool = Arc::new(BrowserPool::new(config.clone()));
        Ok(Self {
            http_client,
            browser_pool,
            sessions: Arc::new(SessionStore::new()),
            config: Arc::new(config),
        })
    }
}
