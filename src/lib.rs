#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # External Task Client
//!
//! A client for working on external tasks published by a BPM process engine.
//! The engine parks process instances at external task activities; workers
//! poll the engine's REST API, lock a batch of tasks for a lease period,
//! execute application logic, and report an outcome before the lease expires.
//! Multiple workers compete safely: a lock grants exclusive processing rights
//! until it times out or is released.
//!
//! ## Architecture
//!
//! - [`client`] - client session, builder, poll loop, and dispatch pool
//! - [`topic`] - topic subscriptions and the subscription registry
//! - [`handler`] - the task handler trait and closure adapter
//! - [`service`] - outcome reporting (complete, fail, BPMN error, lock control)
//! - [`variables`] - typed process variables and wire marshalling
//! - [`backoff`] - poll backoff strategies
//! - [`engine`] - the engine REST API surface
//! - [`error`] - the error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use exttask_client::{handler_fn, ExternalTaskClient, TopicSubscription};
//!
//! # async fn example() -> Result<(), exttask_client::ClientError> {
//! let client = ExternalTaskClient::builder()
//!     .base_url("http://localhost:8080/engine-rest")
//!     .worker_id("invoice-worker")
//!     .build()?;
//!
//! client.subscribe(
//!     TopicSubscription::builder("invoice-creation").build()?,
//!     handler_fn(|task, service| async move {
//!         let _ = service
//!             .complete(&task, Default::default(), Default::default())
//!             .await;
//!     }),
//! )?;
//!
//! client.start()?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod logging;
pub mod service;
pub mod task;
pub mod topic;
pub mod variables;

pub use backoff::{
    BackoffStrategy, ErrorAgnosticBackoff, ErrorAwareBackoffStrategy, ExponentialBackoff,
    ExponentialErrorBackoff,
};
pub use client::{ExternalTaskClient, ExternalTaskClientBuilder, ShutdownMode};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use handler::{handler_fn, ExternalTaskHandler};
pub use service::{ExternalTaskService, MessageCorrelation, TaskFailure};
pub use task::ExternalTask;
pub use topic::{SubscriptionHandle, TopicSubscription, TopicSubscriptionBuilder};
pub use variables::mappers::{JsonObjectSerializer, ObjectSerializer, ValueMapperRegistry};
pub use variables::{ObjectValue, TypedValue, VariableMap};
