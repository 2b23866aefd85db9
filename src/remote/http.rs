use super::RemoteStore;
use crate::protocol::{ServerRecord, SyncError, Table};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// HTTP-backed remote store.
///
/// Talks JSON to the backend's per-table endpoints with bearer-token auth.
/// The backend upserts on the table's conflict key, so retried pushes
/// overwrite instead of duplicating.
pub struct HttpRemote {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct PullResponse {
    records: Vec<ServerRecord>,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .build()
            .unwrap();

        Self {
            base_url: base_url.to_string().trim_end_matches('/').to_string(),
            token: None,
            client,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn set_token(&mut self, token: &str) {
        self.token = Some(token.to_string());
    }

    fn get_headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "application/json".parse().unwrap(),
        );
        if let Some(token) = &self.token {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", token).parse().unwrap(),
            );
        }
        headers
    }

    async fn request<T>(&self, method: &str, path: &str, body: Option<&Value>) -> Result<T, SyncError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.parse().unwrap(), &url);
        request = request.headers(self.get_headers());

        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Connection(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SyncError::Remote(format!(
                "HTTP {} {}: {}",
                status, path, error_text
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| SyncError::Protocol(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&text).map_err(|e| {
            SyncError::Protocol(format!("Failed to parse response: {} - Text: {}", e, text))
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn push(&self, table: Table, record: &ServerRecord) -> Result<ServerRecord, SyncError> {
        let path = format!("/_api/table/{}/upsert", table);
        let body = serde_json::json!({
            "record": record,
            "on_conflict": table.conflict_key(),
        });
        self.request("POST", &path, Some(&body)).await
    }

    async fn pull(&self, table: Table, owner_id: &str) -> Result<Vec<ServerRecord>, SyncError> {
        let path = format!("/_api/table/{}/records?owner_id={}", table, owner_id);
        let response: PullResponse = self.request("GET", &path, None).await?;
        Ok(response.records)
    }

    async fn remove(&self, table: Table, id: &str) -> Result<(), SyncError> {
        let path = format!("/_api/table/{}/records/{}", table, id);
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .delete(&url)
            .headers(self.get_headers())
            .send()
            .await
            .map_err(|e| SyncError::Connection(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        // A delete raced by another device may find nothing; that is still
        // a completed deletion.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(SyncError::Remote(format!(
            "HTTP {} {}: {}",
            status, path, error_text
        )))
    }
}
