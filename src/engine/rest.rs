//! REST implementation of the engine API over reqwest

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use tracing::debug;

use crate::config::ClientConfig;
use crate::engine::dto::{
    BpmnErrorRequest, CompleteRequest, CorrelateMessageRequest, EngineErrorBody,
    ExtendLockRequest, FetchAndLockRequest, FailureRequest, LockRequest, LockedExternalTask,
    SetVariablesRequest,
};
use crate::engine::EngineApi;
use crate::error::{ClientError, ClientResult};

/// JSON/HTTP client for the engine's external task resource
///
/// Owns a connection pool via [`reqwest::Client`]. Transport failures become
/// [`ClientError::ConnectionLost`]; non-2xx responses are classified by
/// [`classify_response`] into the error taxonomy. No retries happen here.
#[derive(Clone)]
pub struct RestEngineApi {
    client: Client,
    base_url: Url,
}

impl std::fmt::Debug for RestEngineApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestEngineApi")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl RestEngineApi {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ClientError::configuration(format!("invalid base URL: {e}")))?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("exttask-client/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ClientError::configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::configuration(format!("failed to construct URL: {e}")))
    }

    async fn post_expecting_no_content<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<()> {
        let url = self.url(path)?;
        debug!(url = %url, "posting external task request");
        let response = self.client.post(url).json(body).send().await?;
        expect_success(response).await
    }
}

#[async_trait]
impl EngineApi for RestEngineApi {
    async fn fetch_and_lock(
        &self,
        request: FetchAndLockRequest,
        timeout: Duration,
    ) -> ClientResult<Vec<LockedExternalTask>> {
        let url = self.url("external-task/fetchAndLock")?;
        debug!(
            url = %url,
            max_tasks = request.max_tasks,
            topics = request.topics.len(),
            "fetching and locking external tasks"
        );

        // per-request timeout: strictly wider than the long-poll window
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<Vec<LockedExternalTask>>()
                .await
                .map_err(|e| ClientError::Engine(format!("invalid fetch response: {e}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_response(status, &body))
        }
    }

    async fn complete(&self, task_id: &str, request: CompleteRequest) -> ClientResult<()> {
        self.post_expecting_no_content(&format!("external-task/{task_id}/complete"), &request)
            .await
    }

    async fn fail(&self, task_id: &str, request: FailureRequest) -> ClientResult<()> {
        self.post_expecting_no_content(&format!("external-task/{task_id}/failure"), &request)
            .await
    }

    async fn bpmn_error(&self, task_id: &str, request: BpmnErrorRequest) -> ClientResult<()> {
        self.post_expecting_no_content(&format!("external-task/{task_id}/bpmnError"), &request)
            .await
    }

    async fn extend_lock(&self, task_id: &str, request: ExtendLockRequest) -> ClientResult<()> {
        self.post_expecting_no_content(&format!("external-task/{task_id}/extendLock"), &request)
            .await
    }

    async fn lock(&self, task_id: &str, request: LockRequest) -> ClientResult<()> {
        self.post_expecting_no_content(&format!("external-task/{task_id}/lock"), &request)
            .await
    }

    async fn unlock(&self, task_id: &str) -> ClientResult<()> {
        let url = self.url(&format!("external-task/{task_id}/unlock"))?;
        let response = self.client.post(url).send().await?;
        expect_success(response).await
    }

    async fn set_variables(
        &self,
        process_instance_id: &str,
        request: SetVariablesRequest,
    ) -> ClientResult<()> {
        self.post_expecting_no_content(
            &format!("process-instance/{process_instance_id}/variables"),
            &request,
        )
        .await
    }

    async fn correlate_message(&self, request: CorrelateMessageRequest) -> ClientResult<()> {
        self.post_expecting_no_content("message", &request).await
    }
}

async fn expect_success(response: Response) -> ClientResult<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body))
    }
}

/// Classify a non-2xx engine response into the error taxonomy
///
/// The engine reports lock-owner conflicts as HTTP 500 with an exception body;
/// those become [`ClientError::LeaseLost`] so callers can distinguish a lost
/// lease from a genuine engine failure. Statuses outside the known set map to
/// [`ClientError::UnknownHttpStatus`].
pub(crate) fn classify_response(status: StatusCode, body: &str) -> ClientError {
    let parsed: EngineErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| truncated(body, 200));

    match status {
        StatusCode::BAD_REQUEST => ClientError::BadRequest(message),
        StatusCode::NOT_FOUND => ClientError::BadRequest(format!("not found: {message}")),
        StatusCode::INTERNAL_SERVER_ERROR => {
            if is_lease_conflict(&parsed, &message) {
                ClientError::LeaseLost(message)
            } else {
                ClientError::Engine(message)
            }
        }
        other => ClientError::UnknownHttpStatus {
            status: other.as_u16(),
            message,
        },
    }
}

fn is_lease_conflict(body: &EngineErrorBody, message: &str) -> bool {
    if body
        .exception_type
        .as_deref()
        .is_some_and(|t| t.contains("TaskAlreadyClaimed"))
    {
        return true;
    }
    message.contains("cannot be completed by worker")
        || message.contains("is locked by")
        || message.contains("lock expired")
}

fn truncated(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        body.to_string()
    } else {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i < limit)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}...", &body[..cut])
    }
}
