//! Connector for the on-device command agent
//!
//! The agent exposes `POST /exec` taking `{"commands": [...]}` and answering
//! `{"success": bool, "output": "...", "error": "..."}`. It stops at the first
//! failing command and reports the partial output.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ExecutionConnector;
use crate::domain::{DomainError, ExecutionResult};

#[derive(Serialize)]
struct ExecRequest<'a> {
    commands: &'a [String],
}

#[derive(Deserialize)]
struct ExecResponse {
    success: bool,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpAgentConnector {
    client: reqwest::Client,
    agent_port: u16,
}

impl HttpAgentConnector {
    pub fn new(agent_port: u16, timeout: Duration) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, agent_port })
    }

    /// Bare hosts get the agent port; full URLs are used as given
    fn endpoint(&self, address: &str) -> String {
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{}/exec", address.trim_end_matches('/'))
        } else {
            format!("http://{}:{}/exec", address, self.agent_port)
        }
    }
}

#[async_trait]
impl ExecutionConnector for HttpAgentConnector {
    async fn execute(
        &self,
        address: &str,
        commands: &[String],
    ) -> Result<ExecutionResult, DomainError> {
        let url = self.endpoint(address);
        let started = Instant::now();

        tracing::debug!("📡 POST {} ({} commands)", url, commands.len());

        let response = self
            .client
            .post(&url)
            .json(&ExecRequest { commands })
            .send()
            .await
            .map_err(|e| DomainError::External(format!("agent at {} unreachable: {}", url, e)))?;

        let status = response.status();
        let duration_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut result =
                ExecutionResult::failure(format!("agent returned {}: {}", status, body.trim()));
            result.duration_ms = duration_ms;
            return Ok(result);
        }

        let body: ExecResponse = response
            .json()
            .await
            .map_err(|e| DomainError::External(format!("invalid agent response: {}", e)))?;

        Ok(ExecutionResult {
            success: body.success,
            output: body.output,
            error: body.error,
            duration_ms,
        })
    }
}
