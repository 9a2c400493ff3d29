//! Topic handler trait
//!
//! Application code implements [`ExternalTaskHandler`] (or wraps an async
//! closure with [`handler_fn`]) and registers it per topic. Handlers run on the
//! client's bounded dispatch pool; a slow handler delays only its own permit,
//! never the poll loop. Panics inside a handler are contained by the dispatcher
//! and logged, they do not take down the client.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::service::ExternalTaskService;
use crate::task::ExternalTask;

/// Callback invoked once per fetched task on the configured topic
///
/// The handler owns the task for the duration of the call and reports its
/// outcome through `service` (complete, fail, BPMN error) or deliberately lets
/// the lease expire. Errors from outcome reports are returned to the handler,
/// never retried behind its back.
#[async_trait]
pub trait ExternalTaskHandler: Send + Sync {
    async fn execute(&self, task: ExternalTask, service: ExternalTaskService);
}

/// Adapt an async closure into an [`ExternalTaskHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ExternalTaskHandler>
where
    F: Fn(ExternalTask, ExternalTaskService) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ExternalTaskHandler for FnHandler<F>
where
    F: Fn(ExternalTask, ExternalTaskService) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn execute(&self, task: ExternalTask, service: ExternalTaskService) {
        (self.f)(task, service).await;
    }
}
