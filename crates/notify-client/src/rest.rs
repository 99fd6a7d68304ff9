//! REST collaborator for the notification listing and its mutations.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use notify_core::{NotificationRecord, SessionToken, SnapshotBody, SnapshotPage};
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// One page of the listing, 1-based.
    async fn fetch_page(&self, page: u32) -> Result<SnapshotPage, ApiError>;

    async fn mark_read(&self, id: &str) -> Result<(), ApiError>;

    async fn mark_all_read(&self) -> Result<(), ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    /// Follows `next` links until the listing ends or `max_pages` pages were read.
    async fn fetch_snapshot(&self, max_pages: u32) -> Result<Vec<NotificationRecord>, ApiError> {
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let fetched = self.fetch_page(page).await?;
            records.extend(fetched.records);
            if fetched.next.is_none() || page >= max_pages.max(1) {
                break;
            }
            page += 1;
        }
        Ok(records)
    }
}

/// `reqwest` implementation against the backend's notification endpoints.
#[derive(Clone)]
pub struct HttpNotificationApi {
    http: Client,
    base_url: String,
    token: SessionToken,
}

impl HttpNotificationApi {
    pub fn new(base_url: impl Into<String>, token: SessionToken) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, token: SessionToken) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/notifications/{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let res = request.bearer_auth(self.token.expose()).send().await?;
        if res.status().is_success() {
            Ok(res)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::UnexpectedStatus { status, body })
        }
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch_page(&self, page: u32) -> Result<SnapshotPage, ApiError> {
        let url = self.url("");
        let res = self
            .send(self.http.get(url).query(&[("page", page)]))
            .await?;
        let body: SnapshotBody = serde_json::from_slice(&res.bytes().await?)?;
        let page_records = body.into_page(Utc::now());
        debug!(
            target = "notify.rest",
            page,
            records = page_records.records.len(),
            has_next = page_records.next.is_some(),
            "fetched notification page"
        );
        Ok(page_records)
    }

    async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        self.send(self.http.post(self.url(&format!("{id}/read/"))))
            .await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.send(self.http.post(self.url("read-all/"))).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.send(self.http.delete(self.url(&format!("{id}/"))))
            .await?;
        Ok(())
    }
}

/// Calls observed by [`InMemoryNotificationApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    FetchPage(u32),
    MarkRead(String),
    MarkAllRead,
    Delete(String),
}

/// In-memory backend for tests and offline wiring, with failure injection.
pub struct InMemoryNotificationApi {
    records: Mutex<Vec<NotificationRecord>>,
    page_size: usize,
    fail_all: AtomicBool,
    failing_ids: Mutex<HashSet<String>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl Default for InMemoryNotificationApi {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InMemoryNotificationApi {
    pub fn new(records: Vec<NotificationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            page_size: 20,
            fail_all: AtomicBool::new(false),
            failing_ids: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn set_records(&self, records: Vec<NotificationRecord>) {
        *self.records.lock() = records;
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().clone()
    }

    /// Makes every call fail until switched off again.
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Makes mutations that target `id` fail.
    pub fn fail_id(&self, id: impl Into<String>) {
        self.failing_ids.lock().insert(id.into());
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    fn record_call(&self, call: ApiCall) -> Result<(), ApiError> {
        let target = match &call {
            ApiCall::MarkRead(id) | ApiCall::Delete(id) => Some(id.clone()),
            _ => None,
        };
        self.calls.lock().push(call);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected("backend unavailable".into()));
        }
        if let Some(id) = target {
            if self.failing_ids.lock().contains(&id) {
                return Err(ApiError::Rejected(format!("mutation refused for {id}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationApi for InMemoryNotificationApi {
    async fn fetch_page(&self, page: u32) -> Result<SnapshotPage, ApiError> {
        self.record_call(ApiCall::FetchPage(page))?;
        let records = self.records.lock();
        let start = (page.max(1) as usize - 1) * self.page_size;
        let end = (start + self.page_size).min(records.len());
        let slice = records.get(start..end).unwrap_or_default().to_vec();
        let next = (end < records.len()).then(|| format!("page={}", page + 1));
        Ok(SnapshotPage {
            records: slice,
            next,
            count: Some(records.len() as u64),
        })
    }

    async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        self.record_call(ApiCall::MarkRead(id.to_string()))?;
        for record in self.records.lock().iter_mut().filter(|r| r.id == id) {
            record.read = true;
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.record_call(ApiCall::MarkAllRead)?;
        for record in self.records.lock().iter_mut() {
            record.read = true;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.record_call(ApiCall::Delete(id.to_string()))?;
        self.records.lock().retain(|r| r.id != id);
        Ok(())
    }
}
