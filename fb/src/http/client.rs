//! HTTP client for function workers
//!
//! Thin wrapper over the worker-facing routes: poll a task, post its result,
//! adjust the timeout, read string resources.

use std::time::Duration;

use eyre::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use super::server::ErrorBody;
use crate::domain::{FunctionsConfiguration, KeyValueSetting, TaskParameter, TaskResult};

/// Default timeout for one HTTP exchange
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a funcbridge endpoint
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: Client,
    base_url: String,
}

impl WorkerClient {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:9676`)
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Fetch the next task for a (component, state machine); `None` when idle
    pub async fn fetch_task(&self, component_name: &str, state_machine_name: &str) -> Result<Option<TaskParameter>> {
        debug!(%component_name, %state_machine_name, "WorkerClient::fetch_task: called");
        let response = self
            .http
            .get(self.url("Functions"))
            .query(&[("componentName", component_name), ("stateMachineName", state_machine_name)])
            .send()
            .await
            .context("Failed to reach funcbridge")?;

        if response.status() == StatusCode::NO_CONTENT {
            debug!("WorkerClient::fetch_task: no task available");
            return Ok(None);
        }
        let response = check(response).await?;
        Ok(Some(response.json().await.context("Failed to decode task")?))
    }

    /// Post a function result
    pub async fn post_result(&self, result: &TaskResult) -> Result<()> {
        debug!(correlation_id = %result.correlation_id, "WorkerClient::post_result: called");
        let response = self
            .http
            .post(self.url("Functions"))
            .json(result)
            .send()
            .await
            .context("Failed to reach funcbridge")?;
        check(response).await?;
        Ok(())
    }

    /// Replace the timeout configuration
    pub async fn post_configuration(&self, configuration: &FunctionsConfiguration) -> Result<()> {
        debug!(timeout_ms = ?configuration.timeout_in_millis, "WorkerClient::post_configuration: called");
        let response = self
            .http
            .post(self.url("Configuration"))
            .json(configuration)
            .send()
            .await
            .context("Failed to reach funcbridge")?;
        check(response).await?;
        Ok(())
    }

    /// List string resources
    pub async fn string_resources(&self) -> Result<Vec<KeyValueSetting>> {
        debug!("WorkerClient::string_resources: called");
        let response = self
            .http
            .get(self.url("StringResources"))
            .send()
            .await
            .context("Failed to reach funcbridge")?;
        let response = check(response).await?;
        response.json().await.context("Failed to decode string resources")
    }
}

/// Turn a non-success response into an error carrying the server message
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);
    debug!(%status, %message, "check: request rejected");
    Err(eyre::eyre!("funcbridge rejected request ({}): {}", status.as_u16(), message))
}
