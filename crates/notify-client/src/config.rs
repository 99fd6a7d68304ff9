use std::time::Duration;

use notify_core::store::DEFAULT_MAX_PUSH_RECORDS;
use notify_core::{RetryPolicy, DEFAULT_PUSH_PATH};

/// Settings for a [`crate::NotificationClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base, e.g. `https://budget.example.com/api`. The push address is derived from it.
    pub api_base_url: String,
    pub push_path: String,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub refresh_interval: Duration,
    pub max_snapshot_pages: u32,
    pub max_push_records: usize,
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            push_path: DEFAULT_PUSH_PATH.to_string(),
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(30),
            max_snapshot_pages: 10,
            max_push_records: DEFAULT_MAX_PUSH_RECORDS,
        }
    }

    pub fn with_push_path(mut self, path: impl Into<String>) -> Self {
        self.push_path = path.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_max_snapshot_pages(mut self, pages: u32) -> Self {
        self.max_snapshot_pages = pages.max(1);
        self
    }

    pub fn with_max_push_records(mut self, records: usize) -> Self {
        self.max_push_records = records.max(1);
        self
    }
}
