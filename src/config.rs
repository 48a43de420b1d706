//! Configuration management for Quill Server

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ordering: OrderingConfig,
    pub progress: ProgressQueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderingConfig {
    /// Attempts made after a book revision mismatch before giving up
    pub max_conflict_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressQueueConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// A user's lane worker exits after this long without work
    pub lane_idle_secs: u64,
    pub dead_letter_capacity: usize,
}

impl ProgressQueueConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn lane_idle(&self) -> Duration {
        Duration::from_secs(self.lane_idle_secs)
    }
}

impl Default for OrderingConfig {
    fn default() -> Self {
        OrderingConfig {
            max_conflict_retries: 3,
        }
    }
}

impl Default for ProgressQueueConfig {
    fn default() -> Self {
        ProgressQueueConfig {
            max_attempts: 5,
            backoff_base_ms: 50,
            backoff_max_ms: 2000,
            lane_idle_secs: 30,
            dead_letter_capacity: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./quill.db".to_string(),
            },
            ordering: OrderingConfig::default(),
            progress: ProgressQueueConfig::default(),
        }
    }
}

impl Config {
    /// Read configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            ordering: OrderingConfig {
                max_conflict_retries: parse_var(
                    "ORDERING_MAX_CONFLICT_RETRIES",
                    defaults.ordering.max_conflict_retries,
                ),
            },
            progress: ProgressQueueConfig {
                max_attempts: parse_var("PROGRESS_MAX_ATTEMPTS", defaults.progress.max_attempts)
                    .max(1),
                backoff_base_ms: parse_var(
                    "PROGRESS_BACKOFF_BASE_MS",
                    defaults.progress.backoff_base_ms,
                ),
                backoff_max_ms: parse_var(
                    "PROGRESS_BACKOFF_MAX_MS",
                    defaults.progress.backoff_max_ms,
                ),
                lane_idle_secs: parse_var(
                    "PROGRESS_LANE_IDLE_SECS",
                    defaults.progress.lane_idle_secs,
                ),
                dead_letter_capacity: parse_var(
                    "PROGRESS_DEAD_LETTER_CAPACITY",
                    defaults.progress.dead_letter_capacity,
                ),
            },
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.ordering.max_conflict_retries, 3);
        assert_eq!(config.progress.backoff_base(), Duration::from_millis(50));
        assert_eq!(config.progress.lane_idle(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_var_falls_back_on_garbage() {
        env::set_var("QUILL_TEST_PARSE_VAR", "not-a-number");
        assert_eq!(parse_var("QUILL_TEST_PARSE_VAR", 7u32), 7);
        env::set_var("QUILL_TEST_PARSE_VAR", "12");
        assert_eq!(parse_var("QUILL_TEST_PARSE_VAR", 7u32), 12);
        env::remove_var("QUILL_TEST_PARSE_VAR");
    }
}
