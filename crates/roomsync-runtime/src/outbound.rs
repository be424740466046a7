//! Persistence Endpoint client
//!
//! Submits a composed message and returns the stored record. There are no
//! automatic retries; a failure marks the message `Failed`.

use std::time::Duration;

use async_trait::async_trait;
use roomsync_core::{EndpointConfig, PersistRequest, PersistedRecord, Result, RoomId, SyncError};
use tracing::debug;

use crate::http::{build_client, request_error};

/// Durable store for newly composed messages
#[async_trait]
pub trait PersistenceEndpoint: Send + Sync {
    async fn persist(&self, room: &RoomId, request: &PersistRequest) -> Result<PersistedRecord>;
}

/// Persistence Endpoint over HTTP
#[derive(Debug, Clone)]
pub struct HttpPersistenceEndpoint {
    client: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl HttpPersistenceEndpoint {
    pub fn new(endpoints: &EndpointConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url_template: endpoints.persist_url.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl PersistenceEndpoint for HttpPersistenceEndpoint {
    async fn persist(&self, room: &RoomId, request: &PersistRequest) -> Result<PersistedRecord> {
        let url = EndpointConfig::resolve(&self.url_template, room);
        debug!(url = %url, key = %request.correlation_key, "Persisting message");

        let response = self
            .client
            .post(&url)
            .json(request)
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
        Ok(serde_json::from_str(&body)?)
    }
}
