//! # External Task Client
//!
//! The composition root and top-level control loop. One client owns one
//! logical poll loop: it snapshots the subscription registry, fetches and
//! locks a batch sized to the dispatch pool's free capacity, fans the tasks
//! out to handlers on a semaphore-bounded pool, feeds the cycle outcome to the
//! backoff strategy, and sleeps the computed delay. Fetch errors never
//! terminate the loop; shutdown stops new fetch cycles immediately and drains
//! in-flight handlers gracefully or within a grace period.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::backoff::{
    BackoffStrategy, ErrorAgnosticBackoff, ErrorAwareBackoffStrategy, ExponentialBackoff,
};
use crate::config::ClientConfig;
use crate::engine::{EngineApi, RestEngineApi};
use crate::error::{ClientError, ClientResult};
use crate::fetch::FetchAndLockClient;
use crate::handler::ExternalTaskHandler;
use crate::service::ExternalTaskService;
use crate::task::ExternalTask;
use crate::topic::{SubscriptionHandle, SubscriptionRegistry, TopicSubscription};
use crate::variables::mappers::{ObjectSerializer, ValueMapperRegistry};

/// How [`ExternalTaskClient::stop`] treats in-flight handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let every in-flight handler run to completion
    Graceful,
    /// Wait up to the configured grace period, then abort what remains
    Forced,
}

type DeferredRegistration = Box<dyn FnOnce(&mut ValueMapperRegistry) + Send>;

/// Builder for [`ExternalTaskClient`]
///
/// Collects configuration, the backoff strategy, the object serializer and
/// type registrations, and (for tests or alternate transports) an engine API
/// override. `build` wires everything together; nothing global is touched.
pub struct ExternalTaskClientBuilder {
    config: ClientConfig,
    backoff: Option<Box<dyn ErrorAwareBackoffStrategy>>,
    serializer: Option<Arc<dyn ObjectSerializer>>,
    registrations: Vec<DeferredRegistration>,
    engine: Option<Arc<dyn EngineApi>>,
}

impl Default for ExternalTaskClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalTaskClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            backoff: None,
            serializer: None,
            registrations: Vec::new(),
            engine: None,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.config.worker_id = worker_id.into();
        self
    }

    pub fn max_tasks(mut self, max_tasks: usize) -> Self {
        self.config.max_tasks = max_tasks;
        self
    }

    pub fn use_priority(mut self, use_priority: bool) -> Self {
        self.config.use_priority = use_priority;
        self
    }

    /// Enable long polling with the given server-side window
    pub fn async_response_timeout(mut self, timeout: Duration) -> Self {
        self.config.async_response_timeout = Some(timeout);
        self
    }

    pub fn lock_duration(mut self, duration: Duration) -> Self {
        self.config.lock_duration = duration;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.config.max_concurrent_tasks = max;
        self
    }

    pub fn disable_backoff(mut self) -> Self {
        self.config.disable_backoff = true;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Use a plain backoff strategy; it is adapted to the error-aware
    /// contract with a no-op on the error parameter
    pub fn backoff_strategy<S>(mut self, strategy: S) -> Self
    where
        S: BackoffStrategy + 'static,
    {
        self.backoff = Some(Box::new(ErrorAgnosticBackoff::new(strategy)));
        self
    }

    /// Use a backoff strategy that also sees the previous cycle's error
    pub fn error_aware_backoff_strategy<S>(mut self, strategy: S) -> Self
    where
        S: ErrorAwareBackoffStrategy + 'static,
    {
        self.backoff = Some(Box::new(strategy));
        self
    }

    /// Replace the default JSON object serializer
    pub fn object_serializer(mut self, serializer: Arc<dyn ObjectSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Register a decoder for an object variable type name
    pub fn register_object_type<T>(mut self, type_name: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Serialize + 'static,
    {
        let type_name = type_name.into();
        self.registrations.push(Box::new(move |registry| {
            registry.register_object_type::<T>(type_name);
        }));
        self
    }

    /// Substitute the engine transport; used by tests and embedded setups
    pub fn engine_api(mut self, engine: Arc<dyn EngineApi>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> ClientResult<ExternalTaskClient> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let mut registry = match self.serializer {
            Some(serializer) => ValueMapperRegistry::new(serializer),
            None => ValueMapperRegistry::default(),
        };
        for register in self.registrations {
            register(&mut registry);
        }
        let mappers = Arc::new(registry);

        let engine: Arc<dyn EngineApi> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(RestEngineApi::new(&config)?),
        };

        let backoff = self
            .backoff
            .unwrap_or_else(|| Box::new(ErrorAgnosticBackoff::new(ExponentialBackoff::default())));

        let service = ExternalTaskService::new(
            Arc::clone(&engine),
            Arc::clone(&mappers),
            config.worker_id.clone(),
        );
        let fetcher = Arc::new(FetchAndLockClient::new(
            engine,
            Arc::clone(&mappers),
            Arc::clone(&config),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(None);

        info!(
            worker_id = %config.worker_id,
            base_url = %config.base_url,
            max_tasks = config.max_tasks,
            max_concurrent_tasks = config.max_concurrent_tasks,
            "external task client built"
        );

        Ok(ExternalTaskClient {
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            service,
            fetcher,
            config,
            shutdown_tx,
            shutdown_rx,
            backoff: Mutex::new(Some(backoff)),
            poll_handle: Mutex::new(None),
        })
    }
}

/// A client session against one engine endpoint
///
/// Subscribe handlers, then [`start`](Self::start) the poll loop. The
/// subscription registry may be mutated from any thread while the loop runs;
/// each cycle works off a point-in-time snapshot. A session starts once;
/// after [`stop`](Self::stop), build a new client to poll again.
pub struct ExternalTaskClient {
    config: Arc<ClientConfig>,
    subscriptions: Arc<SubscriptionRegistry>,
    semaphore: Arc<Semaphore>,
    service: ExternalTaskService,
    fetcher: Arc<FetchAndLockClient>,
    shutdown_tx: watch::Sender<Option<ShutdownMode>>,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    backoff: Mutex<Option<Box<dyn ErrorAwareBackoffStrategy>>>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExternalTaskClient {
    pub fn builder() -> ExternalTaskClientBuilder {
        ExternalTaskClientBuilder::new()
    }

    /// The worker id this session attributes leases to
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Register a handler for a topic
    ///
    /// Fails fast with [`ClientError::Configuration`] if the topic already has
    /// an open subscription.
    pub fn subscribe(
        &self,
        subscription: TopicSubscription,
        handler: Arc<dyn ExternalTaskHandler>,
    ) -> ClientResult<SubscriptionHandle> {
        self.subscriptions.subscribe(subscription, handler)
    }

    /// Close a subscription; idempotent
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.subscriptions.unsubscribe(handle);
    }

    /// The outcome reporting service, for use outside handler callbacks
    pub fn service(&self) -> ExternalTaskService {
        self.service.clone()
    }

    /// Start the poll loop on the current Tokio runtime
    pub fn start(&self) -> ClientResult<()> {
        let backoff = self
            .backoff
            .lock()
            .take()
            .ok_or_else(|| ClientError::configuration("client was already started"))?;

        let poll_loop = PollLoop {
            config: Arc::clone(&self.config),
            subscriptions: Arc::clone(&self.subscriptions),
            semaphore: Arc::clone(&self.semaphore),
            service: self.service.clone(),
            fetcher: Arc::clone(&self.fetcher),
            shutdown_rx: self.shutdown_rx.clone(),
            backoff,
        };

        info!(worker_id = %self.config.worker_id, "starting poll loop");
        *self.poll_handle.lock() = Some(tokio::spawn(poll_loop.run()));
        Ok(())
    }

    /// Stop the poll loop and wait for it to wind down
    ///
    /// No new fetch cycles are scheduled once this is called; an in-progress
    /// long poll is abandoned. In-flight handlers drain per `mode`.
    pub async fn stop(&self, mode: ShutdownMode) {
        if self.shutdown_tx.send(Some(mode)).is_err() {
            return;
        }
        let handle = self.poll_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "poll loop task failed during shutdown");
            }
        }
        info!(worker_id = %self.config.worker_id, ?mode, "client stopped");
    }
}

/// The single logical poll loop of a session
struct PollLoop {
    config: Arc<ClientConfig>,
    subscriptions: Arc<SubscriptionRegistry>,
    semaphore: Arc<Semaphore>,
    service: ExternalTaskService,
    fetcher: Arc<FetchAndLockClient>,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    backoff: Box<dyn ErrorAwareBackoffStrategy>,
}

impl PollLoop {
    async fn run(mut self) {
        let mut handlers: JoinSet<()> = JoinSet::new();

        loop {
            if self.shutdown_rx.borrow().is_some() {
                break;
            }

            // reap finished handler tasks so panics are surfaced promptly
            while let Some(result) = handlers.try_join_next() {
                log_handler_exit(result);
            }

            // backpressure: never fetch a batch the pool cannot absorb
            let available = self.semaphore.available_permits();
            if available == 0 {
                debug!("dispatch pool saturated, waiting for capacity");
                tokio::select! {
                    permit = self.semaphore.acquire() => drop(permit),
                    _ = self.shutdown_rx.changed() => {}
                }
                continue;
            }

            let snapshot = self.subscriptions.snapshot();
            let (fetched_count, cycle_error) = if snapshot.is_empty() {
                // nothing subscribed: an empty cycle, backed off like one
                (0, None)
            } else {
                let max_tasks = self.config.max_tasks.min(available);
                tokio::select! {
                    result = self.fetcher.fetch_and_lock(&snapshot, max_tasks) => {
                        match result {
                            Ok(outcome) => {
                                let count = outcome.fetched_count();
                                for (task, handler) in outcome.tasks {
                                    self.dispatch(&mut handlers, task, handler).await;
                                }
                                (count, None)
                            }
                            Err(e) => {
                                warn!(error = %e, "fetch-and-lock cycle failed; continuing after backoff");
                                (0, Some(e))
                            }
                        }
                    }
                    _ = self.shutdown_rx.changed() => break,
                }
            };

            self.backoff.reconfigure(fetched_count, cycle_error.as_ref());
            let delay = self.backoff.calculate_backoff_time();
            if !self.config.disable_backoff && delay > Duration::ZERO {
                debug!(delay_ms = delay.as_millis() as u64, "backing off before next fetch");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = self.shutdown_rx.changed() => break,
                }
            }
        }

        let mode = (*self.shutdown_rx.borrow()).unwrap_or(ShutdownMode::Graceful);
        self.drain(handlers, mode).await;
    }

    async fn dispatch(
        &self,
        handlers: &mut JoinSet<()>,
        task: ExternalTask,
        handler: Arc<dyn ExternalTaskHandler>,
    ) {
        // cannot block: the batch was sized to the free permits
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let service = self.service.clone();
        let task_id = task.id.clone();
        let topic = task.topic_name.clone();
        debug!(task_id = %task_id, topic = %topic, "dispatching task to handler");

        handlers.spawn(async move {
            let outcome = AssertUnwindSafe(handler.execute(task, service.clone()))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!(
                    task_id = %task_id,
                    topic = %topic,
                    "task handler panicked; lease will expire unless an outcome was already reported"
                );
            }
            // nothing can report on this task anymore; keep the outcome
            // ledger bounded by the in-flight set
            service.release(&task_id);
            drop(permit);
        });
    }

    async fn drain(&self, mut handlers: JoinSet<()>, mode: ShutdownMode) {
        if handlers.is_empty() {
            return;
        }
        info!(in_flight = handlers.len(), ?mode, "draining in-flight handlers");

        match mode {
            ShutdownMode::Graceful => {
                while let Some(result) = handlers.join_next().await {
                    log_handler_exit(result);
                }
            }
            ShutdownMode::Forced => {
                let grace = self.config.shutdown_grace;
                let deadline = tokio::time::Instant::now() + grace;
                loop {
                    tokio::select! {
                        joined = handlers.join_next() => match joined {
                            Some(result) => log_handler_exit(result),
                            None => break,
                        },
                        () = tokio::time::sleep_until(deadline) => {
                            warn!(
                                remaining = handlers.len(),
                                grace_ms = grace.as_millis() as u64,
                                "grace period elapsed, aborting remaining handlers"
                            );
                            handlers.abort_all();
                            while let Some(result) = handlers.join_next().await {
                                log_handler_exit(result);
                            }
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn log_handler_exit(result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!("handler task aborted during forced shutdown"),
        Err(e) => error!(error = %e, "handler task terminated abnormally"),
    }
}
