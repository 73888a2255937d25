//! `reqwest`-based implementation of [`shared::ports::ExecutorClient`] that
//! talks to the real execution service over HTTP (§6, "Executor HTTP API"),
//! plus a fake used by pipeline/worker tests.
//!
//! Grounded on the agent's `send_metrics_to_server`/`upload_config_to_server_static`
//! pattern (`agent/src/main.rs`): a `reqwest::Client` built once with a
//! configured timeout, JSON request bodies, and a status-code branch that
//! turns a non-success response into an error carrying the response body.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shared::ids::EndpointId;
use shared::ports::{EndpointStatusSample, ExecutorClient, SubmissionItem, SubmitOutcome};
use shared::SchedulerError;

/// One element of the `/submit` request body: `[function_id, endpoint_id,
/// payload_base64]`, matching the executor's tuple-array wire shape (§6).
#[derive(Debug, Serialize)]
struct SubmitTuple(String, String, String);

#[derive(Debug, Serialize)]
struct SubmitRequest {
    tasks: Vec<SubmitTuple>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    status: String,
    task_uuids: Vec<String>,
}

/// Talks to the real execution service (§6, "Executor HTTP API").
pub struct HttpExecutorClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExecutorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> shared::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Config(format!("failed to build executor HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn submit(
        &self,
        items: &[SubmissionItem],
        headers: &HashMap<String, String>,
    ) -> shared::Result<SubmitOutcome> {
        let request = SubmitRequest {
            tasks: items
                .iter()
                .map(|item| {
                    SubmitTuple(
                        item.function_id.to_string(),
                        item.endpoint.to_string(),
                        shared::utils::encode_base64(&item.payload),
                    )
                })
                .collect(),
        };

        let url = format!("{}/submit", self.base_url);
        let mut request_builder = self.client.post(&url).json(&request);
        for (name, value) in headers {
            request_builder = request_builder.header(name, value);
        }

        let response = request_builder
            .send()
            .await
            .map_err(|e| SchedulerError::ExecutorUnavailable(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".into());
            return Err(SchedulerError::ExecutorProtocol(format!(
                "executor returned {status} from {url}: {body}"
            ))
            .into());
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| SchedulerError::ExecutorProtocol(format!("malformed /submit response: {e}")))?;

        if parsed.status != "Success" {
            return Err(SchedulerError::ExecutorProtocol(format!(
                "executor reported non-success status {:?} from {url}",
                parsed.status
            ))
            .into());
        }

        Ok(SubmitOutcome {
            task_uuids: parsed.task_uuids,
        })
    }

    async fn endpoint_status(&self, endpoint: &EndpointId) -> shared::Result<Vec<EndpointStatusSample>> {
        let url = format!("{}/endpoints/{}/status", self.base_url, endpoint.as_str());

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SchedulerError::ExecutorUnavailable(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".into());
            return Err(SchedulerError::ExecutorProtocol(format!(
                "executor returned {status} from {url}: {body}"
            ))
            .into());
        }

        response
            .json()
            .await
            .map_err(|e| SchedulerError::ExecutorProtocol(format!("malformed endpoint status response: {e}")).into())
    }
}

/// In-memory stand-in for tests (pipeline, submission worker, watchdog):
/// records every `submit` call, hands back caller-scripted real ids, and
/// serves a caller-scripted status list per endpoint.
#[derive(Default)]
pub struct FakeExecutorClient {
    pub submitted: tokio::sync::Mutex<Vec<(Vec<SubmissionItem>, HashMap<String, String>)>>,
    pub next_uuids: tokio::sync::Mutex<Vec<String>>,
    pub statuses: tokio::sync::Mutex<HashMap<EndpointId, Vec<EndpointStatusSample>>>,
    /// When set, `submit` fails with this message instead of succeeding.
    pub fail_submit: tokio::sync::Mutex<Option<String>>,
}

impl FakeExecutorClient {
    /// Queues real task ids to be returned by the next `submit` calls, one
    /// batch's worth at a time, in FIFO order.
    pub async fn push_uuids(&self, uuids: Vec<String>) {
        self.next_uuids.lock().await.extend(uuids);
    }

    pub async fn set_status(&self, endpoint: EndpointId, samples: Vec<EndpointStatusSample>) {
        self.statuses.lock().await.insert(endpoint, samples);
    }

    pub async fn set_fail_submit(&self, message: Option<String>) {
        *self.fail_submit.lock().await = message;
    }
}

#[async_trait]
impl ExecutorClient for FakeExecutorClient {
    async fn submit(
        &self,
        items: &[SubmissionItem],
        headers: &HashMap<String, String>,
    ) -> shared::Result<SubmitOutcome> {
        if let Some(message) = self.fail_submit.lock().await.clone() {
            return Err(SchedulerError::ExecutorUnavailable(message).into());
        }

        self.submitted
            .lock()
            .await
            .push((items.to_vec(), headers.clone()));

        let mut queued = self.next_uuids.lock().await;
        let task_uuids = if queued.len() >= items.len() {
            queued.drain(0..items.len()).collect()
        } else {
            // No scripted ids left: mint fresh ones so callers that don't
            // care about specific values still get a valid-shaped response.
            (0..items.len())
                .map(|_| uuid::Uuid::new_v4().to_string())
                .collect()
        };

        Ok(SubmitOutcome { task_uuids })
    }

    async fn endpoint_status(&self, endpoint: &EndpointId) -> shared::Result<Vec<EndpointStatusSample>> {
        Ok(self
            .statuses
            .lock()
            .await
            .get(endpoint)
            .cloned()
            .unwrap_or_default())
    }
}
