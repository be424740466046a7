//! History Service client
//!
//! One-shot `GET` of the room's persisted messages. Failures are returned to
//! the core logic task, which turns them into a retryable history status.

use std::time::Duration;

use async_trait::async_trait;
use roomsync_core::{EndpointConfig, HistoryRecord, Result, RoomId, SyncError};
use tracing::debug;

use crate::http::{build_client, request_error};

/// Source of a room's history snapshot
#[async_trait]
pub trait HistoryService: Send + Sync {
    async fn fetch(&self, room: &RoomId) -> Result<Vec<HistoryRecord>>;
}

/// History Service over HTTP
#[derive(Debug, Clone)]
pub struct HttpHistoryService {
    client: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl HttpHistoryService {
    pub fn new(endpoints: &EndpointConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url_template: endpoints.history_url.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl HistoryService for HttpHistoryService {
    async fn fetch(&self, room: &RoomId) -> Result<Vec<HistoryRecord>> {
        let url = EndpointConfig::resolve(&self.url_template, room);
        debug!(url = %url, "Fetching history");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(&url, e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::rejected(&url, status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| request_error(&url, e, self.timeout))?;
        let records = HistoryRecord::decode_list(&body)?;
        debug!(url = %url, count = records.len(), "History fetched");
        Ok(records)
    }
}
