//! Client configuration
//!
//! All knobs recognized by the client, with the defaults the protocol
//! documents. Configuration is programmatic through
//! [`crate::client::ExternalTaskClientBuilder`]; this struct is the validated
//! result shared across the poll loop, fetch client, and reporter.

use std::time::Duration;

use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

/// Configuration for one external task client session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the engine's REST endpoint, e.g. `http://localhost:8080/engine-rest`
    pub base_url: String,
    /// Stable worker identifier the server attributes leases to
    pub worker_id: String,
    /// Upper bound of tasks requested per fetch, before backpressure trimming
    pub max_tasks: usize,
    /// Ask the engine to return tasks in priority order
    pub use_priority: bool,
    /// Long-poll window the server may hold a fetch open; `None` polls
    /// without waiting
    pub async_response_timeout: Option<Duration>,
    /// Default lock duration for topics that do not override it
    pub lock_duration: Duration,
    /// Network timeout for non-fetch requests
    pub request_timeout: Duration,
    /// Added on top of `async_response_timeout` to form the fetch network
    /// timeout, which must be strictly greater than the long-poll window
    pub fetch_timeout_margin: Duration,
    /// Size of the handler dispatch pool; also the backpressure bound on how
    /// many leases may be outstanding at once
    pub max_concurrent_tasks: usize,
    /// Skip the inter-cycle delay entirely
    pub disable_backoff: bool,
    /// How long a forced shutdown waits for in-flight handlers before
    /// aborting them
    pub shutdown_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/engine-rest".to_string(),
            worker_id: generated_worker_id(),
            max_tasks: 10,
            use_priority: true,
            async_response_timeout: None,
            lock_duration: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
            fetch_timeout_margin: Duration::from_secs(10),
            max_concurrent_tasks: 10,
            disable_backoff: false,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Network timeout applied to fetch-and-lock calls
    ///
    /// Strictly wider than the requested long-poll window so the server, not
    /// the client transport, terminates an idle long poll.
    pub fn fetch_timeout(&self) -> Duration {
        match self.async_response_timeout {
            Some(long_poll) => long_poll + self.fetch_timeout_margin,
            None => self.request_timeout,
        }
    }

    pub(crate) fn validate(&self) -> ClientResult<()> {
        if self.base_url.is_empty() {
            return Err(ClientError::configuration("base URL must not be empty"));
        }
        if self.worker_id.is_empty() {
            return Err(ClientError::configuration("worker id must not be empty"));
        }
        if self.max_tasks == 0 {
            return Err(ClientError::configuration("max_tasks must be at least 1"));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(ClientError::configuration(
                "max_concurrent_tasks must be at least 1",
            ));
        }
        if self.lock_duration.is_zero() {
            return Err(ClientError::configuration("lock duration must be non-zero"));
        }
        if self.fetch_timeout_margin.is_zero() {
            return Err(ClientError::configuration(
                "fetch timeout margin must be non-zero so the network timeout exceeds the long-poll window",
            ));
        }
        Ok(())
    }
}

/// Worker id used when the application does not supply one
fn generated_worker_id() -> String {
    format!("worker-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ClientConfig::default().validate().unwrap();
    }

    #[test]
    fn generated_worker_ids_are_unique() {
        let a = ClientConfig::default();
        let b = ClientConfig::default();
        assert_ne!(a.worker_id, b.worker_id);
    }

    #[test]
    fn fetch_timeout_strictly_exceeds_long_poll_window() {
        let config = ClientConfig {
            async_response_timeout: Some(Duration::from_secs(30)),
            ..ClientConfig::default()
        };
        assert!(config.fetch_timeout() > Duration::from_secs(30));
    }

    #[test]
    fn zero_max_tasks_is_rejected() {
        let config = ClientConfig {
            max_tasks: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
