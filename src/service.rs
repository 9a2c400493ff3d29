//! # Task Outcome Reporting
//!
//! [`ExternalTaskService`] encodes outcome reports and sends them through the
//! engine API. Exactly one terminal outcome (complete, failure, BPMN error) is
//! allowed per task; the service keeps a ledger of acknowledged outcomes and
//! rejects a second terminal report client-side, before any network activity.
//! A ledger entry lives only while the task could still be reported on: the
//! dispatcher releases it when the task's handler returns, so the ledger stays
//! bounded by the number of in-flight tasks. Report errors are returned to the
//! caller untouched: retrying a report against an already-resolved or
//! lease-lost task could corrupt workflow state, so that decision stays with
//! the application.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::engine::dto::{
    BpmnErrorRequest, CompleteRequest, CorrelateMessageRequest, ExtendLockRequest, FailureRequest,
    LockRequest, SetVariablesRequest,
};
use crate::engine::EngineApi;
use crate::error::{ClientError, ClientResult};
use crate::task::ExternalTask;
use crate::variables::mappers::ValueMapperRegistry;
use crate::variables::wire::WireVariables;
use crate::variables::VariableMap;

/// The terminal outcome recorded for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminalOutcome {
    Completed,
    Failed,
    BpmnError,
}

impl TerminalOutcome {
    fn describe(self) -> &'static str {
        match self {
            TerminalOutcome::Completed => "completed",
            TerminalOutcome::Failed => "failed",
            TerminalOutcome::BpmnError => "reported as BPMN error",
        }
    }
}

/// A failure report for [`ExternalTaskService::fail`]
///
/// `retries` left at `None` is transmitted as JSON `null`, delegating the
/// decrement-or-default decision to the server; the client never substitutes a
/// number. When the server-side counter reaches zero it raises an incident.
#[derive(Debug, Clone, Default)]
pub struct TaskFailure {
    pub error_message: String,
    pub error_details: Option<String>,
    pub retries: Option<u32>,
    pub retry_timeout: Duration,
    pub variables: VariableMap,
    pub local_variables: VariableMap,
}

impl TaskFailure {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            ..Self::default()
        }
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    pub fn variables(mut self, variables: VariableMap) -> Self {
        self.variables = variables;
        self
    }

    pub fn local_variables(mut self, variables: VariableMap) -> Self {
        self.local_variables = variables;
        self
    }
}

/// A message correlation request for [`ExternalTaskService::correlate_message`]
#[derive(Debug, Clone, Default)]
pub struct MessageCorrelation {
    pub message_name: String,
    pub business_key: Option<String>,
    pub correlation_keys: VariableMap,
    pub process_variables: VariableMap,
    /// Broadcast to all matching subscriptions instead of exactly one
    pub all: bool,
}

impl MessageCorrelation {
    pub fn new(message_name: impl Into<String>) -> Self {
        Self {
            message_name: message_name.into(),
            ..Self::default()
        }
    }
}

/// Reports task outcomes and auxiliary mutations to the engine
///
/// Cheap to clone; one instance is shared by every handler invocation of a
/// client session. The engine API and value mapper registry are injected by
/// the composition root.
#[derive(Clone)]
pub struct ExternalTaskService {
    engine: Arc<dyn EngineApi>,
    mappers: Arc<ValueMapperRegistry>,
    worker_id: String,
    terminal_ledger: Arc<DashMap<String, TerminalOutcome>>,
}

impl std::fmt::Debug for ExternalTaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalTaskService")
            .field("worker_id", &self.worker_id)
            .field("terminally_reported", &self.terminal_ledger.len())
            .finish()
    }
}

impl ExternalTaskService {
    pub fn new(
        engine: Arc<dyn EngineApi>,
        mappers: Arc<ValueMapperRegistry>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            mappers,
            worker_id: worker_id.into(),
            terminal_ledger: Arc::new(DashMap::new()),
        }
    }

    /// The worker id reports are attributed to
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Complete a task, resuming the workflow behind it
    ///
    /// `variables` land in the task's ancestor execution hierarchy,
    /// `local_variables` in its own scope. Fails with
    /// [`ClientError::LeaseLost`] if the lock already expired or was
    /// reassigned; the ledger then stays clean so the application can decide
    /// what to do.
    pub async fn complete(
        &self,
        task: &ExternalTask,
        variables: VariableMap,
        local_variables: VariableMap,
    ) -> ClientResult<()> {
        self.guard_terminal(&task.id)?;
        let request = CompleteRequest {
            worker_id: self.worker_id.clone(),
            variables: self.encode(&variables)?,
            local_variables: self.encode(&local_variables)?,
        };
        self.engine.complete(&task.id, request).await?;
        self.record_terminal(&task.id, TerminalOutcome::Completed);
        info!(task_id = %task.id, topic = %task.topic_name, "task completed");
        Ok(())
    }

    /// Report a technical failure
    ///
    /// Transmits the retry counter and timeout as given; see [`TaskFailure`]
    /// for the retries-omitted semantics.
    pub async fn fail(&self, task: &ExternalTask, failure: TaskFailure) -> ClientResult<()> {
        self.guard_terminal(&task.id)?;
        let request = FailureRequest {
            worker_id: self.worker_id.clone(),
            error_message: failure.error_message,
            error_details: failure.error_details,
            retries: failure.retries,
            retry_timeout: failure.retry_timeout.as_millis() as u64,
            variables: self.encode(&failure.variables)?,
            local_variables: self.encode(&failure.local_variables)?,
        };
        self.engine.fail(&task.id, request).await?;
        self.record_terminal(&task.id, TerminalOutcome::Failed);
        info!(task_id = %task.id, topic = %task.topic_name, "task failure reported");
        Ok(())
    }

    /// Report a business failure the workflow catches via an error boundary
    pub async fn bpmn_error(
        &self,
        task: &ExternalTask,
        error_code: impl Into<String>,
        error_message: Option<String>,
        variables: VariableMap,
    ) -> ClientResult<()> {
        self.guard_terminal(&task.id)?;
        let request = BpmnErrorRequest {
            worker_id: self.worker_id.clone(),
            error_code: error_code.into(),
            error_message,
            variables: self.encode(&variables)?,
        };
        self.engine.bpmn_error(&task.id, request).await?;
        self.record_terminal(&task.id, TerminalOutcome::BpmnError);
        info!(task_id = %task.id, topic = %task.topic_name, "BPMN error reported");
        Ok(())
    }

    /// Renew the lease without completing the task
    ///
    /// Long-running handlers call this to avoid losing ownership
    /// mid-execution. Non-terminal.
    pub async fn extend_lock(
        &self,
        task: &ExternalTask,
        new_duration: Duration,
    ) -> ClientResult<()> {
        let request = ExtendLockRequest {
            worker_id: self.worker_id.clone(),
            new_duration: new_duration.as_millis() as u64,
        };
        self.engine.extend_lock(&task.id, request).await?;
        debug!(task_id = %task.id, "lock extended");
        Ok(())
    }

    /// Lock a task obtained outside the fetch-and-lock API
    pub async fn lock(&self, task_id: &str, lock_duration: Duration) -> ClientResult<()> {
        let request = LockRequest {
            worker_id: self.worker_id.clone(),
            lock_duration: lock_duration.as_millis() as u64,
        };
        self.engine.lock(task_id, request).await?;
        debug!(task_id = %task_id, "task locked");
        Ok(())
    }

    /// Clear the task's lock and worker attribution without completing it
    pub async fn unlock(&self, task: &ExternalTask) -> ClientResult<()> {
        self.engine.unlock(&task.id).await?;
        debug!(task_id = %task.id, "task unlocked");
        Ok(())
    }

    /// Set variables in the task's ancestor execution hierarchy; non-terminal
    pub async fn set_variables(
        &self,
        task: &ExternalTask,
        variables: VariableMap,
    ) -> ClientResult<()> {
        let process_instance_id = task.process_instance_id.as_deref().ok_or_else(|| {
            ClientError::BadRequest(format!(
                "task {} carries no process instance id to scope setVariables to",
                task.id
            ))
        })?;
        let request = SetVariablesRequest {
            worker_id: self.worker_id.clone(),
            modifications: self.encode(&variables)?,
        };
        self.engine.set_variables(process_instance_id, request).await
    }

    /// Correlate a message with the engine; unrelated to any task lease
    pub async fn correlate_message(&self, message: MessageCorrelation) -> ClientResult<()> {
        let request = CorrelateMessageRequest {
            message_name: message.message_name,
            business_key: message.business_key,
            correlation_keys: self.encode(&message.correlation_keys)?,
            process_variables: self.encode(&message.process_variables)?,
            all: message.all,
        };
        self.engine.correlate_message(request).await
    }

    fn encode(&self, variables: &VariableMap) -> ClientResult<WireVariables> {
        variables
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.mappers.serialize(value)?)))
            .collect()
    }

    fn guard_terminal(&self, task_id: &str) -> ClientResult<()> {
        if let Some(previous) = self.terminal_ledger.get(task_id) {
            return Err(ClientError::configuration(format!(
                "task {task_id} was already {}; only one terminal outcome is allowed",
                previous.describe()
            )));
        }
        Ok(())
    }

    fn record_terminal(&self, task_id: &str, outcome: TerminalOutcome) {
        self.terminal_ledger.insert(task_id.to_string(), outcome);
    }

    /// Drop the ledger entry for a task whose handler has returned
    ///
    /// Called by the dispatcher once nothing can report on the task anymore.
    /// A later redelivery of the same task id (after its lease expired) starts
    /// with a clean slate.
    pub(crate) fn release(&self, task_id: &str) {
        self.terminal_ledger.remove(task_id);
    }
}
