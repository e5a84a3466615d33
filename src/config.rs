//! Boot-time configuration, loaded once from environment variables.
//!
//! No config-loading crate is used here — values are pulled straight out
//! of `std::env` the way the rest of this codebase reads its knobs, with
//! `unwrap_or(default)` covering anything optional.

use std::env;
use std::time::Duration;

/// Everything the boot sequencer needs to wire up the core.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,

    pub database_url: String,
    pub kv_host: String,
    pub kv_port: u16,
    pub kv_connect_timeout: Duration,

    pub polling_interval: Duration,
    pub event_max_retries: u32,
    pub max_concurrent_events: usize,

    pub webhook_min_block_number: u64,
    pub webhook_shared_secret: String,

    pub dead_letter_ttl: Duration,

    pub log_dir: String,
    pub log_file: String,
    pub log_level: String,
    pub log_json: bool,
    pub log_rotation: String,
}

/// Error raised when a required environment variable is missing or
/// malformed in a way that has no sane default.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let webhook_shared_secret = env::var("WEBHOOK_SHARED_SECRET")
            .map_err(|_| ConfigError::Missing("WEBHOOK_SHARED_SECRET"))?;

        Ok(Self {
            host: env_or("HOST", "0.0.0.0".to_string()),
            port: env_parsed_or("PORT", 3000)?,

            database_url,
            kv_host: env_or("KV_HOST", "127.0.0.1".to_string()),
            kv_port: env_parsed_or("KV_PORT", 6379)?,
            kv_connect_timeout: Duration::from_millis(env_parsed_or(
                "KV_CONNECT_TIMEOUT_MS",
                17_000,
            )?),

            polling_interval: Duration::from_millis(env_parsed_or(
                "POLLING_INTERVAL_MS",
                60_000,
            )?),
            event_max_retries: env_parsed_or("EVENT_MAX_RETRIES", 10)?,
            max_concurrent_events: env_parsed_or("MAX_CONCURRENT_EVENTS", 5)?,

            webhook_min_block_number: env_parsed_or("WEBHOOK_MIN_BLOCK_NUMBER", 0)?,
            webhook_shared_secret,

            dead_letter_ttl: Duration::from_millis(env_parsed_or(
                "DEAD_LETTER_TTL_MS",
                604_800_000,
            )?),

            log_dir: env_or("LOG_DIR", "logs".to_string()),
            log_file: env_or("LOG_FILE", "mark-invoice-core.log".to_string()),
            log_level: env_or("LOG_LEVEL", "info".to_string()),
            log_json: env_or("LOG_JSON", "false".to_string()) == "true",
            log_rotation: env_or("LOG_ROTATION", "daily".to_string()),
        })
    }
}

fn env_or(key: &'static str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parsed_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name: key,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // `AppConfig::from_env` reads process-global env vars. The default test
    // harness runs tests in the same process concurrently, so every test
    // touching these keys serializes through this lock rather than racing
    // each other's set_var/remove_var calls.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_database_url_is_fatal_and_defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        // SAFETY: serialized by ENV_LOCK, no other test in this process reads these keys concurrently.
        unsafe {
            env::remove_var("DATABASE_URL");
        }
        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));

        unsafe {
            env::set_var("DATABASE_URL", "postgres://localhost/mark");
            env::set_var("WEBHOOK_SHARED_SECRET", "test-secret");
            env::remove_var("PORT");
            env::remove_var("EVENT_MAX_RETRIES");
        }
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.event_max_retries, 10);
    }
}
