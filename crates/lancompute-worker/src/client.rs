//! Thin HTTP client over the coordinator's API.

use std::time::Duration;

use anyhow::{Context, Result};
use lancompute_core::model::{CapabilityValue, TaskStatus};
use lancompute_core::wire::{
    HeartbeatRequest, HeartbeatResponse, NodeRegistrationRequest, TaskUpdateRequest, TaskUpdateResponse,
};
use reqwest::StatusCode;
use uuid::Uuid;
use std::collections::HashMap;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A heartbeat can fail in a way the agent loop needs to distinguish:
/// a 404 means the coordinator has no record of this node (it
/// restarted, or never saw the registration) and the worker must
/// re-register before its next beat, per the control-plane protocol.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("coordinator does not recognize node {0}")]
    UnknownNode(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn register(
        &self,
        node_id: &str,
        address: &str,
        port: u16,
        capabilities: HashMap<String, CapabilityValue>,
    ) -> Result<()> {
        let body = NodeRegistrationRequest {
            node_id: Some(node_id.to_string()),
            address: address.to_string(),
            port,
            capabilities,
        };
        let response = self
            .http
            .post(format!("{}/node/register", self.base_url))
            .json(&body)
            .send()
            .await
            .context("registration request failed")?;
        anyhow::ensure!(
            response.status().is_success(),
            "registration rejected: {}",
            response.status()
        );
        Ok(())
    }

    pub async fn heartbeat(&self, node_id: &str) -> Result<HeartbeatResponse, HeartbeatError> {
        let body = HeartbeatRequest {
            node_id: node_id.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/node/heartbeat", self.base_url))
            .json(&body)
            .send()
            .await
            .context("heartbeat request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(HeartbeatError::UnknownNode(node_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(HeartbeatError::Other(anyhow::anyhow!(
                "heartbeat rejected: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .context("failed to decode heartbeat response")
            .map_err(HeartbeatError::Other)
    }

    pub async fn update_task(
        &self,
        task_id: Uuid,
        node_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<TaskUpdateResponse> {
        let body = TaskUpdateRequest {
            task_id,
            node_id: Some(node_id.to_string()),
            status,
            result,
            error,
        };
        let response = self
            .http
            .post(format!("{}/task/update", self.base_url))
            .json(&body)
            .send()
            .await
            .context("task update request failed")?;
        anyhow::ensure!(
            response.status().is_success(),
            "task update rejected: {}",
            response.status()
        );
        response
            .json()
            .await
            .context("failed to decode task update response")
    }
}
