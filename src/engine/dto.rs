//! Wire DTOs for the engine's external task REST API
//!
//! All request bodies are keyed by `workerId`; the engine rejects any mutation
//! whose server-held lock owner differs. Field names follow the engine's
//! camelCase convention via serde renames.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::variables::wire::WireVariables;

/// Aggregate fetch-and-lock request covering all open subscriptions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAndLockRequest {
    pub worker_id: String,
    pub max_tasks: usize,
    pub use_priority: bool,
    /// Long-poll timeout in milliseconds; the server may hold the request open
    /// this long awaiting newly available tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_response_timeout: Option<u64>,
    pub topics: Vec<FetchTopic>,
}

/// Per-topic slice of the fetch request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTopic {
    pub topic_name: String,
    /// Lock duration in milliseconds for tasks fetched on this topic
    pub lock_duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub local_variables: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub process_definition_id_in: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub process_definition_key_in: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_definition_version_tag: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub without_tenant_id: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tenant_id_in: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_extension_properties: bool,
}

/// One locked task as returned by fetch-and-lock
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedExternalTask {
    pub id: String,
    pub topic_name: String,
    #[serde(default)]
    pub worker_id: String,
    #[serde(default)]
    pub lock_expiration_time: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub business_key: Option<String>,
    #[serde(default)]
    pub process_instance_id: Option<String>,
    #[serde(default)]
    pub process_definition_id: Option<String>,
    #[serde(default)]
    pub process_definition_key: Option<String>,
    #[serde(default)]
    pub process_definition_version_tag: Option<String>,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub variables: WireVariables,
    #[serde(default)]
    pub extension_properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub worker_id: String,
    pub variables: WireVariables,
    pub local_variables: WireVariables,
}

/// Failure report; `retries: null` delegates the retry decrement to the
/// server's configured default, so the field is serialized even when unset
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRequest {
    pub worker_id: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    pub retries: Option<u32>,
    pub retry_timeout: u64,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub variables: WireVariables,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub local_variables: WireVariables,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BpmnErrorRequest {
    pub worker_id: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub variables: WireVariables,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLockRequest {
    pub worker_id: String,
    pub new_duration: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    pub worker_id: String,
    pub lock_duration: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariablesRequest {
    pub worker_id: String,
    pub modifications: WireVariables,
}

/// Message correlation request, the non-task-scoped auxiliary mutation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelateMessageRequest {
    pub message_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub correlation_keys: WireVariables,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub process_variables: WireVariables,
    /// Broadcast to all matching subscriptions instead of exactly one
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub all: bool,
}

/// Error body the engine attaches to non-2xx responses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineErrorBody {
    #[serde(default, rename = "type")]
    pub exception_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
