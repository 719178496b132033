use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// JSON output and an error-only file when true.
    pub production: bool,
    pub level: LogLevel,
    pub dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            production: false,
            level: LogLevel::Debug,
            dir: "logs".to_string(),
        }
    }
}

impl LogConfig {
    pub fn from_env(environment: &str) -> Self {
        let production = environment == "production";
        let level = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(if production {
                LogLevel::Info
            } else {
                LogLevel::Debug
            });

        Self {
            production,
            level,
            dir: std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
        }
    }

    /// Default filter directive when `RUST_LOG` is unset.
    pub fn filter_directive(&self) -> String {
        format!(
            "fansite_backend={},tower_http=debug,axum=debug,sqlx=warn",
            self.level
        )
    }
}
