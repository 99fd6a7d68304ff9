use std::collections::HashMap;
use std::time::Duration;

use notify_client::ClientConfig;
use notify_core::RetryPolicy;
use serde::Deserialize;

/// Settings read from `NOTIFY__*` environment variables (and `.env`).
/// Command-line flags override anything set here.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub push_path: Option<String>,
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_max_snapshot_pages")]
    pub max_snapshot_pages: u32,
    #[serde(default = "default_max_push_records")]
    pub max_push_records: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(None)
    }

    /// `source` replaces the process environment; used by tests.
    pub fn from_source(source: Option<HashMap<String, String>>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("NOTIFY")
                    .prefix_separator("__")
                    .separator("__")
                    .source(source),
            )
            .build()?
            .try_deserialize::<AppConfig>()
            .map(AppConfig::normalize)
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.api_base_url.clone())
            .with_retry_policy(RetryPolicy {
                delay: Duration::from_millis(self.retry_delay_ms),
                max_attempts: self.max_retries,
            })
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs.max(1)))
            .with_refresh_interval(Duration::from_secs(self.refresh_interval_secs.max(1)))
            .with_max_snapshot_pages(self.max_snapshot_pages)
            .with_max_push_records(self.max_push_records);
        if let Some(path) = &self.push_path {
            config = config.with_push_path(path.clone());
        }
        config
    }

    fn normalize(mut self) -> Self {
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        if self.api_base_url.is_empty() {
            self.api_base_url = default_api_base_url();
        }
        self.token = Self::normalize_opt(self.token.take());
        self.locale = Self::normalize_opt(self.locale.take());
        self.push_path = Self::normalize_opt(self.push_path.take());
        self.log_path = Self::normalize_opt(self.log_path.take());
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_retry_delay_ms() -> u64 {
    3_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_max_snapshot_pages() -> u32 {
    10
}

fn default_max_push_records() -> usize {
    notify_core::store::DEFAULT_MAX_PUSH_RECORDS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = AppConfig::from_source(env(&[])).unwrap();
        assert_eq!(cfg.api_base_url, "http://localhost:8000/api");
        assert_eq!(cfg.token, None);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.retry_delay_ms, 3_000);

        let client = cfg.client_config();
        assert_eq!(client.retry, RetryPolicy::default());
        assert_eq!(client.refresh_interval, Duration::from_secs(30));
        assert_eq!(client.max_push_records, notify_core::store::DEFAULT_MAX_PUSH_RECORDS);
    }

    #[test]
    fn reads_prefixed_variables_and_trims_blanks() {
        let cfg = AppConfig::from_source(env(&[
            ("NOTIFY__API_BASE_URL", " https://budget.example.com/api/ "),
            ("NOTIFY__TOKEN", "   "),
            ("NOTIFY__LOCALE", "ar"),
            ("NOTIFY__MAX_RETRIES", "2"),
            ("NOTIFY__PUSH_PATH", "/ws/alerts/"),
            ("NOTIFY__MAX_PUSH_RECORDS", "50"),
            ("UNRELATED", "x"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_base_url, "https://budget.example.com/api");
        assert_eq!(cfg.token, None);
        assert_eq!(cfg.locale.as_deref(), Some("ar"));
        assert_eq!(cfg.max_retries, 2);

        let client = cfg.client_config();
        assert_eq!(client.push_path, "/ws/alerts/");
        assert_eq!(client.retry.max_attempts, 2);
        assert_eq!(client.max_push_records, 50);
    }
}
