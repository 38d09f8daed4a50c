//! HTTP client for a remote ledger service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::backend::{LedgerBackend, LedgerError, LedgerResult};
use super::types::{BlockInfo, ChainStatus, LedgerEntry};

/// Ledger backend reached over the ledger service's JSON API
pub struct RpcLedger {
    client: Client,
    base_url: String,
}

impl RpcLedger {
    /// Create a client for the service at `base_url`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> LedgerResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Rpc(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> LedgerResult<Response> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if status.is_server_error() {
            return Err(LedgerError::offline(format!("ledger service returned {status}")));
        }
        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> LedgerResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rpc(format!("{status}: {body}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LedgerError::Serialization(e.to_string()))
    }
}

fn classify_transport(e: reqwest::Error) -> LedgerError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        LedgerError::offline(e.to_string())
    } else {
        LedgerError::Rpc(e.to_string())
    }
}

#[async_trait]
impl LedgerBackend for RpcLedger {
    fn name(&self) -> &str {
        "rpc"
    }

    async fn append(&self, payload: Value) -> LedgerResult<LedgerEntry> {
        let response = self
            .send(self.client.post(self.url("/entries")).json(&json!({ "payload": payload })))
            .await?;
        let entry: LedgerEntry = Self::read_json(response).await?;
        debug!(entry_id = %entry.id, sequence = entry.sequence, "Remote ledger append");
        Ok(entry)
    }

    async fn get(&self, id: &str) -> LedgerResult<Option<LedgerEntry>> {
        let response = self
            .send(self.client.get(self.url(&format!("/entries/{id}"))))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(response).await.map(Some)
    }

    async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let response = self.send(self.client.get(self.url("/entries"))).await?;
        Self::read_json(response).await
    }

    async fn blocks(&self, limit: usize) -> LedgerResult<Vec<BlockInfo>> {
        let response = self
            .send(self.client.get(self.url("/blocks")).query(&[("limit", limit)]))
            .await?;
        Self::read_json(response).await
    }

    async fn status(&self) -> LedgerResult<ChainStatus> {
        let response = self.send(self.client.get(self.url("/status"))).await?;
        Self::read_json(response).await
    }

    async fn health(&self) -> LedgerResult<()> {
        let response = self.send(self.client.get(self.url("/health"))).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LedgerError::offline(format!(
                "ledger health returned {}",
                response.status()
            )))
        }
    }

    async fn reset(&self) -> LedgerResult<()> {
        let response = self.send(self.client.post(self.url("/reset"))).await?;
        let _: Value = Self::read_json(response).await?;
        Ok(())
    }
}
