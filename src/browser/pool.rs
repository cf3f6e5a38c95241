//! Domain-keyed registry of [`BrowserManager`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::browser::manager::BrowserManager;
use crate::core::config::FetchConfig;

pub struct BrowserPool {
    config: FetchConfig,
    managers: Mutex<HashMap<String, Arc<BrowserManager>>>,
}

impl BrowserPool {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the manager for `domain`, creating it (with no browser launched
    /// yet) if this is the first request seen for it.
    pub async fn get(&self, domain: &str) -> Result<Arc<BrowserManager>> {
        let mut managers = self.managers.lock().await;
        if let Some(manager) = managers.get(domain) {
            return Ok(Arc::clone(manager));
        }
        let manager = Arc::new(BrowserManager::new(
            domain.to_string(),
            self.config.resolve_browser_headless(),
            self.config.resolve_disable_sandbox(),
            Duration::from_secs(self.config.resolve_browser_idle_seconds()),
        )?);
        managers.insert(domain.to_string(), Arc::clone(&manager));
        Ok(manager)
    }

    /// Stop every browser in the pool concurrently. Used on graceful
    /// shutdown so no Chromium process is left behind.
    pub async fn shutdown(&self) {
        let managers: Vec<Arc<BrowserManager>> = {
            let mut guard = self.managers.lock().await;
            guard.drain().map(|(_, manager)| manager).collect()
        };
        futures::future::join_all(managers.iter().map(|manager| manager.shutdown())).await;
    }
}
