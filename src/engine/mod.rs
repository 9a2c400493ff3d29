//! # Engine API
//!
//! The transport seam between the client and the workflow engine. Components
//! depend on the [`EngineApi`] trait; [`RestEngineApi`] is the production
//! implementation over JSON/HTTP, and tests substitute an in-memory engine.
//! None of the implementations retry internally: retry timing belongs to the
//! poll loop and its backoff strategy, report retries belong to the
//! application.

pub mod dto;
mod rest;

use std::time::Duration;

use async_trait::async_trait;

pub use rest::RestEngineApi;

use crate::error::ClientResult;
use dto::{
    BpmnErrorRequest, CompleteRequest, CorrelateMessageRequest, ExtendLockRequest,
    FetchAndLockRequest, FailureRequest, LockRequest, LockedExternalTask, SetVariablesRequest,
};

/// Engine-side operations of the external task protocol
///
/// Every task-scoped call implicitly fails when the server-held lock owner
/// differs from the `workerId` in the request body; that condition surfaces as
/// [`crate::error::ClientError::LeaseLost`].
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Fetch and lock up to `max_tasks` tasks across the given topics
    ///
    /// `timeout` bounds the whole network call and must strictly exceed the
    /// request's long-poll timeout; the caller computes it from configuration.
    async fn fetch_and_lock(
        &self,
        request: FetchAndLockRequest,
        timeout: Duration,
    ) -> ClientResult<Vec<LockedExternalTask>>;

    async fn complete(&self, task_id: &str, request: CompleteRequest) -> ClientResult<()>;

    async fn fail(&self, task_id: &str, request: FailureRequest) -> ClientResult<()>;

    async fn bpmn_error(&self, task_id: &str, request: BpmnErrorRequest) -> ClientResult<()>;

    async fn extend_lock(&self, task_id: &str, request: ExtendLockRequest) -> ClientResult<()>;

    /// Lock a task obtained outside fetch-and-lock
    async fn lock(&self, task_id: &str, request: LockRequest) -> ClientResult<()>;

    /// Clear the task's lock without completing it
    async fn unlock(&self, task_id: &str) -> ClientResult<()>;

    async fn set_variables(
        &self,
        process_instance_id: &str,
        request: SetVariablesRequest,
    ) -> ClientResult<()>;

    async fn correlate_message(&self, request: CorrelateMessageRequest) -> ClientResult<()>;
}
