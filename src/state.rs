//! Shared application state handed to every handler.

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::db::Store;
use crate::search::SearchSession;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: AppConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.submit_rate_limit),
            store,
            config: Arc::new(config),
        }
    }

    /// Debounced search session over this state's store.
    pub fn search_session(&self) -> SearchSession {
        SearchSession::from_config(self.store.clone(), &self.config)
    }
}

/// One public submission per IP per window. A zero window disables it.
#[derive(Clone)]
pub struct RateLimiter {
    window: Duration,
    last_seen: Arc<RwLock<HashMap<IpAddr, Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// False when `ip` submitted successfully within the window.
    pub async fn allows(&self, ip: IpAddr) -> bool {
        if self.window.is_zero() {
            return true;
        }
        let now = Instant::now();
        self.last_seen
            .read()
            .await
            .get(&ip)
            .map_or(true, |at| now.duration_since(*at) >= self.window)
    }

    /// Start the window for `ip`. Called once a submission has been stored.
    pub async fn record(&self, ip: IpAddr) {
        if self.window.is_zero() {
            return;
        }

        let now = Instant::now();
        let mut last_seen = self.last_seen.write().await;

        // Evict expired entries so the map only holds active IPs.
        last_seen.retain(|_, at| now.duration_since(*at) < self.window);
        last_seen.insert(ip, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recorded_submission_limits_the_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let other: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.allows(ip).await);
        assert!(limiter.allows(ip).await);
        limiter.record(ip).await;
        assert!(!limiter.allows(ip).await);
        assert!(limiter.allows(other).await);
    }

    #[tokio::test]
    async fn test_zero_window_disables_limit() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        limiter.record(ip).await;
        assert!(limiter.allows(ip).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_session_queries_the_state_store() {
        use crate::db::models::NewFunFact;
        use crate::db::MemoryStore;

        let memory = Arc::new(MemoryStore::new());
        memory
            .insert_fun_fact(NewFunFact { title: "Cats nap a lot".into(), description: None })
            .await
            .unwrap();
        let state = AppState::new(memory.clone(), AppConfig::default());

        let session = state.search_session();
        let mut results = session.results();
        session.input("cat");

        let found = results
            .wait_for(|s| s.query == "cat" && !s.loading)
            .await
            .unwrap()
            .hits
            .len();
        assert_eq!(found, 1);
    }
}
