//! Application configuration, read from the environment.

use std::{net::SocketAddr, time::Duration};

use crate::db::DbConfig;
use crate::logging::config::LogConfig;

const DEFAULT_JWT_SECRET: &str = "default-jwt-secret-change-in-production";
const DEFAULT_SUBMIT_WINDOW_SECS: u64 = 10;
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(fallback)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub host: String,
    pub port: u16,
    /// `None` runs against the in-memory store.
    pub database: Option<DbConfig>,
    /// Signing secret of the hosted auth backend's access tokens.
    pub jwt_secret: String,
    pub allowed_origins: Vec<String>,
    pub submit_rate_limit: Duration,
    pub search_debounce: Duration,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3001,
            database: None,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            submit_rate_limit: Duration::from_secs(DEFAULT_SUBMIT_WINDOW_SECS),
            search_debounce: Duration::from_millis(DEFAULT_SEARCH_DEBOUNCE_MS),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| defaults.environment.clone());

        // ALLOWED_ORIGINS (comma-separated) wins over FRONTEND_ORIGIN.
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .or_else(|| std::env::var("FRONTEND_ORIGIN").ok().map(|o| vec![o]))
            .unwrap_or(defaults.allowed_origins);

        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            database: std::env::var("DATABASE_URL").ok().map(|_| DbConfig::default()),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            allowed_origins,
            submit_rate_limit: Duration::from_secs(env_or(
                "SUBMIT_RATE_LIMIT_SECS",
                DEFAULT_SUBMIT_WINDOW_SECS,
            )),
            search_debounce: Duration::from_millis(env_or(
                "SEARCH_DEBOUNCE_MS",
                DEFAULT_SEARCH_DEBOUNCE_MS,
            )),
            log: LogConfig::from_env(&environment),
            environment,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Refuse to run in production with the insecure default secret.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.is_production()
            && (self.jwt_secret.is_empty() || self.jwt_secret == DEFAULT_JWT_SECRET)
        {
            anyhow::bail!(
                "JWT_SECRET must be set to the auth backend's signing secret in production"
            );
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid HOST/PORT configuration: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_usable_in_development() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search_debounce, Duration::from_millis(300));
        assert_eq!(config.submit_rate_limit, Duration::from_secs(10));
        assert!(config.bind_addr().is_ok());
    }

    #[test]
    fn test_production_rejects_default_secret() {
        let config = AppConfig {
            environment: "production".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
