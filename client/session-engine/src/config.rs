use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    pub cache_dir: PathBuf,
    pub tick_interval_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub metrics_dump_on_exit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8081".to_string(),
            api_token: None,
            request_timeout_secs: 10,
            cache_dir: env::temp_dir().join("examprep-session"),
            tick_interval_ms: 1000,
            retry_max_attempts: 3,
            retry_base_backoff_ms: 200,
            retry_max_backoff_ms: 2000,
            metrics_dump_on_exit: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Local .env is optional; explicit environment always wins
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let api_base_url = settings
            .get_string("api.base_url")
            .or_else(|_| env::var("EXAM_API_URL"))
            .unwrap_or(defaults.api_base_url);

        let api_token = settings
            .get_string("api.token")
            .ok()
            .or_else(|| env::var("EXAM_API_TOKEN").ok())
            .filter(|t| !t.is_empty());

        let request_timeout_secs = settings
            .get_int("api.request_timeout_secs")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.request_timeout_secs);

        let cache_dir = settings
            .get_string("cache.dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let tick_interval_ms = settings
            .get_int("timer.tick_interval_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.tick_interval_ms);

        let retry_max_attempts = settings
            .get_int("retry.max_attempts")
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.retry_max_attempts);

        let retry_base_backoff_ms = settings
            .get_int("retry.base_backoff_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(defaults.retry_base_backoff_ms);

        let retry_max_backoff_ms = settings
            .get_int("retry.max_backoff_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(defaults.retry_max_backoff_ms)
            .max(retry_base_backoff_ms);

        let metrics_dump_on_exit = settings
            .get_bool("metrics.dump_on_exit")
            .unwrap_or(defaults.metrics_dump_on_exit);

        if env == "prod" && !api_base_url.starts_with("https://") {
            tracing::warn!(
                "Grading service URL is not https in production: {}",
                api_base_url
            );
        }

        Ok(Config {
            api_base_url,
            api_token,
            request_timeout_secs,
            cache_dir,
            tick_interval_ms,
            retry_max_attempts,
            retry_base_backoff_ms,
            retry_max_backoff_ms,
            metrics_dump_on_exit,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_backoff: Duration::from_millis(self.retry_base_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
            jitter_max: Some(Duration::from_millis(self.retry_base_backoff_ms / 2)),
        }
    }
}
