//! Admin-API-backed [`Store`]: the `-remote` CLI flag routes reads/writes
//! through `GET`/`PUT /api/{config,state,error-template}` on a running
//! instance's admin surface instead of touching the filesystem directly.

use super::{unmarshal_state_map, StateMap, Store, StoreError};
use async_trait::async_trait;
use serde::Deserialize;

pub struct RemoteStore {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl RemoteStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_text(&self, path: &str) -> Result<String, StoreError> {
        let resp = self.client.get(format!("{}{}", self.base_url, path)).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Self::remote_error(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn put(&self, path: &str, body: String, content_type: &str) -> Result<(), StoreError> {
        let resp = self
            .client
            .put(format!("{}{}", self.base_url, path))
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        if status.as_u16() == 204 {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Self::remote_error(status.as_u16(), &body))
    }

    fn remote_error(status: u16, body: &str) -> StoreError {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|e| e.error)
            .unwrap_or_else(|_| body.to_string());
        StoreError::Remote { status, message }
    }
}

#[async_trait]
impl Store for RemoteStore {
    async fn load_config(&self) -> Result<String, StoreError> {
        self.get_text("/api/config").await
    }

    async fn load_state(&self) -> Result<StateMap, StoreError> {
        let raw = self.get_text("/api/state").await?;
        unmarshal_state_map(&raw)
    }

    async fn load_error_template(&self) -> Result<String, StoreError> {
        self.get_text("/api/error-template").await
    }

    async fn save_config(&self, source: &str) -> Result<(), StoreError> {
        self.put("/api/config", source.to_string(), "text/plain").await
    }

    async fn save_state(&self, state: &StateMap) -> Result<(), StoreError> {
        let raw = super::marshal_state_map(state)?;
        self.put("/api/state", raw, "application/json").await
    }

    async fn save_state_json(&self, raw: &str) -> Result<(), StoreError> {
        self.put("/api/state", raw.to_string(), "application/json").await
    }

    async fn save_error_template(&self, template: &str) -> Result<(), StoreError> {
        self.put("/api/error-template", template.to_string(), "text/plain").await
    }
}
