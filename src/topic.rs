//! # Topic Subscriptions
//!
//! Maps topic names to handlers plus per-topic fetch configuration. The
//! registry is the one piece of client state mutated from outside the poll
//! loop (applications subscribe and unsubscribe from arbitrary threads), so it
//! is internally synchronized and hands the fetch builder a point-in-time
//! snapshot that concurrent mutation cannot disturb.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::handler::ExternalTaskHandler;

/// Immutable per-topic fetch configuration
///
/// Created through [`TopicSubscription::builder`]; only the open/closed state
/// managed by the registry changes after creation.
#[derive(Debug, Clone)]
pub struct TopicSubscription {
    /// Topic name, unique among open subscriptions of one client
    pub topic_name: String,
    /// Lock duration for tasks fetched on this topic; `None` uses the client
    /// default
    pub lock_duration: Option<Duration>,
    /// Restrict fetched variables to these names; `None` fetches all
    pub variable_names: Option<Vec<String>>,
    /// Fetch only variables local to the task's execution scope
    pub local_variables: bool,
    pub business_key: Option<String>,
    pub process_definition_ids: Vec<String>,
    pub process_definition_keys: Vec<String>,
    pub process_definition_version_tag: Option<String>,
    pub tenant_ids: Vec<String>,
    pub without_tenant_id: bool,
    pub include_extension_properties: bool,
}

impl TopicSubscription {
    pub fn builder(topic_name: impl Into<String>) -> TopicSubscriptionBuilder {
        TopicSubscriptionBuilder {
            subscription: TopicSubscription {
                topic_name: topic_name.into(),
                lock_duration: None,
                variable_names: None,
                local_variables: false,
                business_key: None,
                process_definition_ids: Vec::new(),
                process_definition_keys: Vec::new(),
                process_definition_version_tag: None,
                tenant_ids: Vec::new(),
                without_tenant_id: false,
                include_extension_properties: false,
            },
        }
    }
}

/// Builder for [`TopicSubscription`]
#[derive(Debug)]
pub struct TopicSubscriptionBuilder {
    subscription: TopicSubscription,
}

impl TopicSubscriptionBuilder {
    pub fn lock_duration(mut self, duration: Duration) -> Self {
        self.subscription.lock_duration = Some(duration);
        self
    }

    /// Restrict the fetched variables; mutually exclusive with fetching all
    pub fn variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscription.variable_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn local_variables(mut self, local: bool) -> Self {
        self.subscription.local_variables = local;
        self
    }

    pub fn business_key(mut self, key: impl Into<String>) -> Self {
        self.subscription.business_key = Some(key.into());
        self
    }

    pub fn process_definition_id(mut self, id: impl Into<String>) -> Self {
        self.subscription.process_definition_ids.push(id.into());
        self
    }

    pub fn process_definition_key(mut self, key: impl Into<String>) -> Self {
        self.subscription.process_definition_keys.push(key.into());
        self
    }

    pub fn process_definition_version_tag(mut self, tag: impl Into<String>) -> Self {
        self.subscription.process_definition_version_tag = Some(tag.into());
        self
    }

    pub fn tenant_id(mut self, tenant: impl Into<String>) -> Self {
        self.subscription.tenant_ids.push(tenant.into());
        self
    }

    pub fn without_tenant_id(mut self) -> Self {
        self.subscription.without_tenant_id = true;
        self
    }

    pub fn include_extension_properties(mut self) -> Self {
        self.subscription.include_extension_properties = true;
        self
    }

    pub fn build(self) -> ClientResult<TopicSubscription> {
        let sub = self.subscription;
        if sub.topic_name.is_empty() {
            return Err(ClientError::configuration("topic name must not be empty"));
        }
        if sub.without_tenant_id && !sub.tenant_ids.is_empty() {
            return Err(ClientError::configuration(format!(
                "topic '{}': withoutTenantId and tenantIdIn are mutually exclusive",
                sub.topic_name
            )));
        }
        Ok(sub)
    }
}

/// Handle returned by [`SubscriptionRegistry::subscribe`]
///
/// Identifies one registration; unsubscribing twice through the same handle is
/// a no-op the second time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: Uuid,
    topic_name: String,
}

impl SubscriptionHandle {
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }
}

/// One open subscription as seen by the fetch request builder
#[derive(Clone)]
pub struct ActiveSubscription {
    pub subscription: Arc<TopicSubscription>,
    pub handler: Arc<dyn ExternalTaskHandler>,
}

struct SubscriptionEntry {
    id: Uuid,
    subscription: Arc<TopicSubscription>,
    handler: Arc<dyn ExternalTaskHandler>,
    open: bool,
}

/// Thread-safe, insertion-ordered registry of topic subscriptions
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic
    ///
    /// Fails fast with [`ClientError::Configuration`] if another open
    /// subscription already claims the topic name. Re-subscribing a topic that
    /// was unsubscribed earlier is allowed.
    pub fn subscribe(
        &self,
        subscription: TopicSubscription,
        handler: Arc<dyn ExternalTaskHandler>,
    ) -> ClientResult<SubscriptionHandle> {
        let mut entries = self.entries.write();

        if entries
            .iter()
            .any(|e| e.open && e.subscription.topic_name == subscription.topic_name)
        {
            return Err(ClientError::configuration(format!(
                "topic '{}' already has an open subscription",
                subscription.topic_name
            )));
        }

        // closed entries for the same topic are superseded, drop them
        entries.retain(|e| e.open || e.subscription.topic_name != subscription.topic_name);

        let handle = SubscriptionHandle {
            id: Uuid::new_v4(),
            topic_name: subscription.topic_name.clone(),
        };
        debug!(topic = %subscription.topic_name, "subscription opened");
        entries.push(SubscriptionEntry {
            id: handle.id,
            subscription: Arc::new(subscription),
            handler,
            open: true,
        });
        Ok(handle)
    }

    /// Close a subscription; idempotent
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == handle.id && e.open) {
            entry.open = false;
            debug!(topic = %entry.subscription.topic_name, "subscription closed");
        }
    }

    /// Point-in-time copy of the open subscriptions, in subscription order
    ///
    /// The fetch request builder works off this copy, so concurrent
    /// subscribe/unsubscribe calls cannot disturb request construction.
    pub fn snapshot(&self) -> Vec<ActiveSubscription> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.open)
            .map(|e| ActiveSubscription {
                subscription: Arc::clone(&e.subscription),
                handler: Arc::clone(&e.handler),
            })
            .collect()
    }

    /// Resolve the handler for a topic, if an open subscription claims it
    pub fn handler_for(&self, topic_name: &str) -> Option<Arc<dyn ExternalTaskHandler>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.open && e.subscription.topic_name == topic_name)
            .map(|e| Arc::clone(&e.handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn noop_handler() -> Arc<dyn ExternalTaskHandler> {
        handler_fn(|_task, _service| async {})
    }

    fn subscription(topic: &str) -> TopicSubscription {
        TopicSubscription::builder(topic).build().unwrap()
    }

    #[test]
    fn duplicate_open_topic_fails_fast() {
        let registry = SubscriptionRegistry::new();
        registry
            .subscribe(subscription("payments"), noop_handler())
            .unwrap();

        let err = registry
            .subscribe(subscription("payments"), noop_handler())
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn resubscribing_after_unsubscribe_succeeds() {
        let registry = SubscriptionRegistry::new();
        let handle = registry
            .subscribe(subscription("payments"), noop_handler())
            .unwrap();
        registry.unsubscribe(&handle);

        registry
            .subscribe(subscription("payments"), noop_handler())
            .unwrap();
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let handle = registry
            .subscribe(subscription("payments"), noop_handler())
            .unwrap();

        registry.unsubscribe(&handle);
        registry.unsubscribe(&handle);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn snapshot_is_stable_under_concurrent_mutation() {
        let registry = SubscriptionRegistry::new();
        registry
            .subscribe(subscription("a"), noop_handler())
            .unwrap();
        let handle_b = registry
            .subscribe(subscription("b"), noop_handler())
            .unwrap();

        let snapshot = registry.snapshot();
        registry.unsubscribe(&handle_b);

        let topics: Vec<_> = snapshot
            .iter()
            .map(|s| s.subscription.topic_name.clone())
            .collect();
        assert_eq!(topics, vec!["a", "b"]);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_preserves_subscription_order() {
        let registry = SubscriptionRegistry::new();
        for topic in ["one", "two", "three"] {
            registry
                .subscribe(subscription(topic), noop_handler())
                .unwrap();
        }
        let topics: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|s| s.subscription.topic_name.clone())
            .collect();
        assert_eq!(topics, vec!["one", "two", "three"]);
    }

    #[test]
    fn builder_rejects_conflicting_tenant_filters() {
        let err = TopicSubscription::builder("payments")
            .tenant_id("t1")
            .without_tenant_id()
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }
}
