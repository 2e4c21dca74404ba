//! Outbound HTTP to passive agents

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::{Error, Result};

/// Body POSTed to an agent's `/api/job/assign`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentPayload {
    pub execution_id: Uuid,
    pub job_id: Uuid,
    pub job_name: String,

    /// The job YAML verbatim; the agent interprets the steps itself
    pub yaml_configuration: String,

    /// Bearer token the agent must present on status/complete callbacks
    pub callback_token: String,
}

#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Hand an assignment to an agent. Any non-2xx or transport failure is an
    /// error; the caller leaves the execution queued and tries elsewhere.
    pub async fn assign(
        &self,
        endpoint_url: &str,
        auth_token: &str,
        payload: &AssignmentPayload,
    ) -> Result<()> {
        let url = format!("{}/api/job/assign", endpoint_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(auth_token)
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Agent rejected assignment: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Poll an agent for an execution's progress
    pub async fn poll_status(
        &self,
        endpoint_url: &str,
        auth_token: &str,
        execution_id: Uuid,
    ) -> Result<serde_json::Value> {
        let url = format!(
            "{}/api/job/{}/status",
            endpoint_url.trim_end_matches('/'),
            execution_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(auth_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Agent status poll failed: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Best-effort revocation of an assignment
    pub async fn revoke(
        &self,
        endpoint_url: &str,
        auth_token: &str,
        execution_id: Uuid,
    ) -> Result<()> {
        let url = format!(
            "{}/api/job/{}/cancel",
            endpoint_url.trim_end_matches('/'),
            execution_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(auth_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Agent revoke failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}
