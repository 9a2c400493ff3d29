//! End-to-end scenarios for the client poll loop against a scripted engine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use exttask_client::engine::dto::{
    BpmnErrorRequest, CompleteRequest, CorrelateMessageRequest, ExtendLockRequest,
    FetchAndLockRequest, FailureRequest, LockRequest, LockedExternalTask, SetVariablesRequest,
};
use exttask_client::engine::EngineApi;
use exttask_client::variables::wire::{WireValue, WireVariables};
use exttask_client::{
    handler_fn, ClientError, ClientResult, ExponentialBackoff, ExternalTaskClient, ShutdownMode,
    TopicSubscription,
};

/// Engine double driven by a script of fetch batches; once the script is
/// exhausted every further fetch returns an empty batch.
#[derive(Default)]
struct MockEngine {
    batches: Mutex<VecDeque<ClientResult<Vec<LockedExternalTask>>>>,
    fetch_requests: Mutex<Vec<FetchAndLockRequest>>,
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
    complete_error: Mutex<Option<ClientError>>,
}

impl MockEngine {
    fn push_batch(&self, batch: ClientResult<Vec<LockedExternalTask>>) {
        self.batches.lock().push_back(batch);
    }
}

#[async_trait]
impl EngineApi for MockEngine {
    async fn fetch_and_lock(
        &self,
        request: FetchAndLockRequest,
        _timeout: Duration,
    ) -> ClientResult<Vec<LockedExternalTask>> {
        self.fetch_requests.lock().push(request);
        match self.batches.lock().pop_front() {
            Some(batch) => batch,
            None => Ok(Vec::new()),
        }
    }

    async fn complete(&self, task_id: &str, _request: CompleteRequest) -> ClientResult<()> {
        if let Some(err) = self.complete_error.lock().take() {
            return Err(err);
        }
        self.completed.lock().push(task_id.to_string());
        Ok(())
    }

    async fn fail(&self, task_id: &str, _request: FailureRequest) -> ClientResult<()> {
        self.failed.lock().push(task_id.to_string());
        Ok(())
    }

    async fn bpmn_error(&self, _task_id: &str, _request: BpmnErrorRequest) -> ClientResult<()> {
        Ok(())
    }

    async fn extend_lock(&self, _task_id: &str, _request: ExtendLockRequest) -> ClientResult<()> {
        Ok(())
    }

    async fn lock(&self, _task_id: &str, _request: LockRequest) -> ClientResult<()> {
        Ok(())
    }

    async fn unlock(&self, _task_id: &str) -> ClientResult<()> {
        Ok(())
    }

    async fn set_variables(
        &self,
        _process_instance_id: &str,
        _request: SetVariablesRequest,
    ) -> ClientResult<()> {
        Ok(())
    }

    async fn correlate_message(&self, _request: CorrelateMessageRequest) -> ClientResult<()> {
        Ok(())
    }
}

fn locked_task(id: &str, topic: &str) -> LockedExternalTask {
    LockedExternalTask {
        id: id.into(),
        topic_name: topic.into(),
        worker_id: "worker-test".into(),
        lock_expiration_time: None,
        retries: None,
        priority: 0,
        business_key: None,
        process_instance_id: Some("proc-1".into()),
        process_definition_id: None,
        process_definition_key: None,
        process_definition_version_tag: None,
        execution_id: None,
        activity_id: None,
        tenant_id: None,
        variables: WireVariables::new(),
        extension_properties: Default::default(),
    }
}

fn build_client(engine: Arc<MockEngine>) -> ExternalTaskClient {
    ExternalTaskClient::builder()
        .base_url("http://localhost:8080/engine-rest")
        .worker_id("worker-test")
        .backoff_strategy(ExponentialBackoff::new(
            Duration::from_millis(5),
            2.0,
            Duration::from_millis(25),
        ))
        .engine_api(engine)
        .build()
        .expect("client builds")
}

fn completing_handler() -> Arc<dyn exttask_client::ExternalTaskHandler> {
    handler_fn(|task, service| async move {
        service
            .complete(&task, Default::default(), Default::default())
            .await
            .expect("complete accepted");
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

#[tokio::test]
async fn fetched_tasks_are_dispatched_and_completed() {
    let engine = Arc::new(MockEngine::default());
    engine.push_batch(Ok(vec![locked_task("t1", "payments")]));

    let client = build_client(Arc::clone(&engine));
    client
        .subscribe(
            TopicSubscription::builder("payments").build().unwrap(),
            completing_handler(),
        )
        .unwrap();
    client.start().unwrap();

    wait_until(|| engine.completed.lock().contains(&"t1".to_string())).await;
    client.stop(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn fetch_errors_do_not_stop_the_poll_loop() {
    let engine = Arc::new(MockEngine::default());
    engine.push_batch(Err(ClientError::ConnectionLost("refused".into())));
    engine.push_batch(Ok(vec![locked_task("t1", "payments")]));

    let client = build_client(Arc::clone(&engine));
    client
        .subscribe(
            TopicSubscription::builder("payments").build().unwrap(),
            completing_handler(),
        )
        .unwrap();
    client.start().unwrap();

    wait_until(|| engine.completed.lock().contains(&"t1".to_string())).await;
    client.stop(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn no_network_call_without_subscriptions() {
    let engine = Arc::new(MockEngine::default());
    let client = build_client(Arc::clone(&engine));
    client.start().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.fetch_requests.lock().is_empty());

    client.stop(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn lease_loss_surfaces_to_the_handler() {
    let engine = Arc::new(MockEngine::default());
    engine.push_batch(Ok(vec![locked_task("t1", "payments")]));
    *engine.complete_error.lock() =
        Some(ClientError::LeaseLost("task is locked by another worker".into()));

    let seen: Arc<Mutex<Option<ClientError>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    let client = build_client(Arc::clone(&engine));
    client
        .subscribe(
            TopicSubscription::builder("payments").build().unwrap(),
            handler_fn(move |task, service| {
                let sink = Arc::clone(&sink);
                async move {
                    let err = service
                        .complete(&task, Default::default(), Default::default())
                        .await
                        .expect_err("lease was lost");
                    *sink.lock() = Some(err);
                }
            }),
        )
        .unwrap();
    client.start().unwrap();

    wait_until(|| seen.lock().is_some()).await;
    assert!(matches!(*seen.lock(), Some(ClientError::LeaseLost(_))));
    assert!(engine.completed.lock().is_empty());

    client.stop(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn undecodable_variables_isolate_only_the_broken_task() {
    let engine = Arc::new(MockEngine::default());
    let mut broken = locked_task("t-bad", "payments");
    broken.variables.insert(
        "amount".into(),
        WireValue::primitive("Chicken", json!(1)),
    );
    engine.push_batch(Ok(vec![locked_task("t-good", "payments"), broken]));

    let client = build_client(Arc::clone(&engine));
    client
        .subscribe(
            TopicSubscription::builder("payments").build().unwrap(),
            completing_handler(),
        )
        .unwrap();
    client.start().unwrap();

    wait_until(|| engine.completed.lock().contains(&"t-good".to_string())).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!engine.completed.lock().contains(&"t-bad".to_string()));

    client.stop(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn fetch_batches_are_sized_to_free_pool_capacity() {
    let engine = Arc::new(MockEngine::default());
    engine.push_batch(Ok(vec![
        locked_task("t1", "payments"),
        locked_task("t2", "payments"),
    ]));
    engine.push_batch(Ok(vec![locked_task("t3", "payments")]));

    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let handler_gate = Arc::clone(&gate);

    let client = ExternalTaskClient::builder()
        .base_url("http://localhost:8080/engine-rest")
        .worker_id("worker-test")
        .max_concurrent_tasks(2)
        .backoff_strategy(ExponentialBackoff::new(
            Duration::from_millis(5),
            2.0,
            Duration::from_millis(25),
        ))
        .engine_api(Arc::clone(&engine) as Arc<dyn EngineApi>)
        .build()
        .unwrap();
    client
        .subscribe(
            TopicSubscription::builder("payments").build().unwrap(),
            handler_fn(move |task, service| {
                let gate = Arc::clone(&handler_gate);
                async move {
                    // consume the permit so one release lets exactly one
                    // handler through
                    gate.acquire().await.expect("gate open").forget();
                    service
                        .complete(&task, Default::default(), Default::default())
                        .await
                        .expect("complete accepted");
                }
            }),
        )
        .unwrap();
    client.start().unwrap();

    // both pool slots fill up; the loop must not fetch again until one frees
    wait_until(|| engine.fetch_requests.lock().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.fetch_requests.lock().len(), 1);
    assert_eq!(engine.fetch_requests.lock()[0].max_tasks, 2);

    gate.add_permits(1);
    wait_until(|| engine.fetch_requests.lock().len() >= 2).await;
    assert_eq!(engine.fetch_requests.lock()[1].max_tasks, 1);

    gate.add_permits(2);
    wait_until(|| engine.completed.lock().len() == 3).await;
    client.stop(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn redelivered_task_ids_can_be_completed_again() {
    let engine = Arc::new(MockEngine::default());
    engine.push_batch(Ok(vec![locked_task("t1", "payments")]));

    let client = build_client(Arc::clone(&engine));
    client
        .subscribe(
            TopicSubscription::builder("payments").build().unwrap(),
            completing_handler(),
        )
        .unwrap();
    client.start().unwrap();

    wait_until(|| engine.completed.lock().len() == 1).await;
    // let the dispatcher finish the handler task before the engine
    // redelivers the same id (as it would after a lease expiry)
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.push_batch(Ok(vec![locked_task("t1", "payments")]));

    wait_until(|| engine.completed.lock().len() == 2).await;
    client.stop(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn graceful_shutdown_drains_in_flight_handlers() {
    let engine = Arc::new(MockEngine::default());
    engine.push_batch(Ok(vec![locked_task("t1", "payments")]));

    let client = build_client(Arc::clone(&engine));
    client
        .subscribe(
            TopicSubscription::builder("payments").build().unwrap(),
            handler_fn(|task, service| async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                service
                    .complete(&task, Default::default(), Default::default())
                    .await
                    .expect("complete accepted");
            }),
        )
        .unwrap();
    client.start().unwrap();

    // a second fetch request proves the first batch was already dispatched
    wait_until(|| engine.fetch_requests.lock().len() >= 2).await;
    client.stop(ShutdownMode::Graceful).await;

    assert!(engine.completed.lock().contains(&"t1".to_string()));
}

#[tokio::test]
async fn forced_shutdown_aborts_handlers_after_the_grace_period() {
    let engine = Arc::new(MockEngine::default());
    engine.push_batch(Ok(vec![locked_task("t1", "payments")]));

    let client = ExternalTaskClient::builder()
        .base_url("http://localhost:8080/engine-rest")
        .worker_id("worker-test")
        .shutdown_grace(Duration::from_millis(100))
        .backoff_strategy(ExponentialBackoff::new(
            Duration::from_millis(5),
            2.0,
            Duration::from_millis(25),
        ))
        .engine_api(Arc::clone(&engine) as Arc<dyn EngineApi>)
        .build()
        .unwrap();
    client
        .subscribe(
            TopicSubscription::builder("payments").build().unwrap(),
            handler_fn(|_task, _service| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }),
        )
        .unwrap();
    client.start().unwrap();

    wait_until(|| engine.fetch_requests.lock().len() >= 2).await;

    let started = std::time::Instant::now();
    client.stop(ShutdownMode::Forced).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(engine.completed.lock().is_empty());

    client.start().expect_err("a stopped session cannot restart");
}
