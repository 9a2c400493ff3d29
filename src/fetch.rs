//! # Fetch-and-Lock Client
//!
//! Builds one aggregate fetch request from a subscription registry snapshot,
//! sends it through the engine API, and decodes the returned batch. A task
//! whose variables cannot be decoded is never silently dropped and never
//! handed to a handler: it is isolated into the outcome's `undecodable` list
//! while its siblings dispatch normally. Transport and server failures are
//! classified and returned as-is; retry timing belongs entirely to the poll
//! loop's backoff strategy.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::engine::dto::{FetchAndLockRequest, FetchTopic, LockedExternalTask};
use crate::engine::EngineApi;
use crate::error::{ClientError, ClientResult};
use crate::handler::ExternalTaskHandler;
use crate::task::ExternalTask;
use crate::topic::ActiveSubscription;
use crate::variables::mappers::{parse_wire_date, ValueMapperRegistry};
use crate::variables::VariableMap;

/// A task excluded from dispatch because its variables could not be decoded
#[derive(Debug)]
pub struct UndecodableTask {
    pub task_id: String,
    pub topic_name: String,
    pub error: ClientError,
}

/// Result of one fetch cycle
pub struct FetchOutcome {
    /// Decoded tasks paired with the handler of their topic, in server order
    pub tasks: Vec<(ExternalTask, Arc<dyn ExternalTaskHandler>)>,
    /// Tasks whose variable map failed to decode
    pub undecodable: Vec<UndecodableTask>,
}

impl FetchOutcome {
    /// Total batch size as returned by the server, undecodable tasks included
    ///
    /// This is what feeds the backoff strategy: a batch with work in it, even
    /// partially undecodable work, means the queue is not empty.
    pub fn fetched_count(&self) -> usize {
        self.tasks.len() + self.undecodable.len()
    }
}

/// Issues fetch-and-lock requests for one client session
pub struct FetchAndLockClient {
    engine: Arc<dyn EngineApi>,
    mappers: Arc<ValueMapperRegistry>,
    config: Arc<ClientConfig>,
}

impl FetchAndLockClient {
    pub fn new(
        engine: Arc<dyn EngineApi>,
        mappers: Arc<ValueMapperRegistry>,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            engine,
            mappers,
            config,
        }
    }

    /// Fetch and lock up to `max_tasks` tasks across all subscriptions in the
    /// snapshot
    pub async fn fetch_and_lock(
        &self,
        snapshot: &[ActiveSubscription],
        max_tasks: usize,
    ) -> ClientResult<FetchOutcome> {
        let request = self.build_request(snapshot, max_tasks);
        let locked = self
            .engine
            .fetch_and_lock(request, self.config.fetch_timeout())
            .await?;

        debug!(
            worker_id = %self.config.worker_id,
            locked = locked.len(),
            "fetch-and-lock returned"
        );

        let mut outcome = FetchOutcome {
            tasks: Vec::with_capacity(locked.len()),
            undecodable: Vec::new(),
        };

        for dto in locked {
            let topic_name = dto.topic_name.clone();
            let task_id = dto.id.clone();

            let handler = snapshot
                .iter()
                .find(|s| s.subscription.topic_name == topic_name)
                .map(|s| Arc::clone(&s.handler));
            let Some(handler) = handler else {
                // subscription was closed between request and response
                warn!(
                    task_id = %task_id,
                    topic = %topic_name,
                    "dropping task for topic without an open subscription; lease will expire"
                );
                continue;
            };

            match self.decode_task(dto) {
                Ok(task) => outcome.tasks.push((task, handler)),
                Err(error) => {
                    warn!(
                        task_id = %task_id,
                        topic = %topic_name,
                        error = %error,
                        "task variables could not be decoded; task is not dispatched"
                    );
                    outcome.undecodable.push(UndecodableTask {
                        task_id,
                        topic_name,
                        error,
                    });
                }
            }
        }

        Ok(outcome)
    }

    fn build_request(
        &self,
        snapshot: &[ActiveSubscription],
        max_tasks: usize,
    ) -> FetchAndLockRequest {
        let topics = snapshot
            .iter()
            .map(|active| {
                let sub = active.subscription.as_ref();
                FetchTopic {
                    topic_name: sub.topic_name.clone(),
                    lock_duration: sub
                        .lock_duration
                        .unwrap_or(self.config.lock_duration)
                        .as_millis() as u64,
                    variables: sub.variable_names.clone(),
                    local_variables: sub.local_variables,
                    business_key: sub.business_key.clone(),
                    process_definition_id_in: sub.process_definition_ids.clone(),
                    process_definition_key_in: sub.process_definition_keys.clone(),
                    process_definition_version_tag: sub.process_definition_version_tag.clone(),
                    without_tenant_id: sub.without_tenant_id,
                    tenant_id_in: sub.tenant_ids.clone(),
                    include_extension_properties: sub.include_extension_properties,
                }
            })
            .collect();

        FetchAndLockRequest {
            worker_id: self.config.worker_id.clone(),
            max_tasks,
            use_priority: self.config.use_priority,
            async_response_timeout: self
                .config
                .async_response_timeout
                .map(|t| t.as_millis() as u64),
            topics,
        }
    }

    fn decode_task(&self, dto: LockedExternalTask) -> ClientResult<ExternalTask> {
        let mut variables = VariableMap::with_capacity(dto.variables.len());
        for (name, wire) in &dto.variables {
            let value = self.mappers.deserialize(wire).map_err(|e| {
                ClientError::data_format(format!("variable '{name}': {e}"))
            })?;
            variables.insert(name.clone(), value);
        }

        let lock_expiration_time = dto
            .lock_expiration_time
            .as_deref()
            .map(parse_wire_date)
            .transpose()?;

        Ok(ExternalTask {
            id: dto.id,
            topic_name: dto.topic_name,
            worker_id: dto.worker_id,
            lock_expiration_time,
            retries: dto.retries,
            priority: dto.priority,
            business_key: dto.business_key,
            process_instance_id: dto.process_instance_id,
            process_definition_id: dto.process_definition_id,
            process_definition_key: dto.process_definition_key,
            process_definition_version_tag: dto.process_definition_version_tag,
            execution_id: dto.execution_id,
            activity_id: dto.activity_id,
            tenant_id: dto.tenant_id,
            variables,
            extension_properties: dto.extension_properties,
        })
    }
}
