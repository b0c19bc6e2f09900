//! Where a session fetches subgraphs for newly added nodes.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::assets::AssetRef;
use crate::error::{ImpactError, Result};
use crate::graph::{DeltaOperation, GraphPayload, OperationReport};

#[async_trait]
pub trait SubgraphSource: Send + Sync {
    /// Graph rooted at `asset`, built by the authoritative side.
    async fn fetch_subgraph(&self, asset: &AssetRef) -> Result<GraphPayload>;
}

/// Remote graph endpoints of an `impactd` server.
pub struct HttpGraphSource {
    client: Client,
    base_url: String,
}

impl HttpGraphSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Submit a delta; returns the per-operation reports in submission order.
    pub async fn submit_delta(&self, operations: &[DeltaOperation]) -> Result<Vec<OperationReport>> {
        let response = self
            .client
            .post(format!("{}/graph/delta", self.base_url))
            .json(operations)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(ImpactError::Unexpected(format!("Delta submission failed {}: {}", status, body)));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SubgraphSource for HttpGraphSource {
    async fn fetch_subgraph(&self, asset: &AssetRef) -> Result<GraphPayload> {
        let id = asset.id.to_string();
        let response = self
            .client
            .get(format!("{}/graph", self.base_url))
            .query(&[("kind", asset.kind.as_str()), ("id", id.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(ImpactError::Validation(format!("{} was rejected by the server", asset)));
        }
        if !status.is_success() {
            return Err(ImpactError::Unexpected(format!("Graph fetch for {} failed with {}", asset, status)));
        }
        Ok(response.json().await?)
    }
}
