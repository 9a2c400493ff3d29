//! External task data model
//!
//! A leased unit of work as handed to a topic handler. The fetch client owns a
//! task until it is dispatched; from then on exactly one terminal outcome is
//! reported through [`crate::service::ExternalTaskService`], or the lease is
//! simply allowed to expire.

use chrono::{DateTime, Utc};

use crate::variables::{TypedValue, VariableMap};

/// A single external task under this worker's lease
#[derive(Debug, Clone)]
pub struct ExternalTask {
    /// Engine-assigned task id; the scope of every mutating request
    pub id: String,
    /// Topic the task was fetched for
    pub topic_name: String,
    /// Worker id holding the lease
    pub worker_id: String,
    /// Lease expiration; reports after this point fail with a lease-lost error
    pub lock_expiration_time: Option<DateTime<Utc>>,
    /// Retries remaining; `None` means the server default applies on the next
    /// failure report
    pub retries: Option<u32>,
    /// Engine-side priority the task was fetched with
    pub priority: i64,
    pub business_key: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub process_definition_key: Option<String>,
    pub process_definition_version_tag: Option<String>,
    pub execution_id: Option<String>,
    pub activity_id: Option<String>,
    pub tenant_id: Option<String>,
    /// Decoded process variables visible to this task
    pub variables: VariableMap,
    /// Extension properties of the external task activity, when requested by
    /// the subscription
    pub extension_properties: std::collections::HashMap<String, String>,
}

impl ExternalTask {
    /// Look up a decoded variable by name
    pub fn variable(&self, name: &str) -> Option<&TypedValue> {
        self.variables.get(name)
    }

    /// Extension property lookup
    pub fn extension_property(&self, name: &str) -> Option<&str> {
        self.extension_properties.get(name).map(String::as_str)
    }
}
