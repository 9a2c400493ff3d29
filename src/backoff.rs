//! # Poll Backoff Strategies
//!
//! Controls the delay between fetch-and-lock cycles so an idle client does not
//! hot-loop against an empty queue. Two capability traits are exposed: the
//! plain [`BackoffStrategy`] and the richer [`ErrorAwareBackoffStrategy`] that
//! also sees the terminal error of the previous cycle. The poll loop always
//! drives the error-aware contract; a plain strategy is wrapped in
//! [`ErrorAgnosticBackoff`] at configuration time, so there is no capability
//! probing at poll time.
//!
//! The contract for both traits: `reconfigure` then `calculate_backoff_time`,
//! in that order, exactly once per poll cycle, from the single poll loop that
//! owns the strategy. An implementation shared across several loops must
//! additionally be safe for concurrent invocation; none of the built-in ones
//! are shared that way.

use std::time::Duration;

use crate::error::ClientError;

/// Inter-poll delay policy fed with the size of the last fetch batch
pub trait BackoffStrategy: Send + Sync {
    /// Record the outcome of the last fetch cycle
    fn reconfigure(&mut self, fetched_tasks: usize);

    /// Delay to apply before the next fetch cycle
    fn calculate_backoff_time(&self) -> Duration;
}

/// Backoff policy that additionally sees the previous cycle's terminal error
///
/// A superset of the plain contract: strategies that do not care about errors
/// are adapted through [`ErrorAgnosticBackoff`] so the poll loop invokes every
/// strategy uniformly.
pub trait ErrorAwareBackoffStrategy: Send + Sync {
    /// Record the outcome of the last fetch cycle, including the error that
    /// terminated it, if any
    fn reconfigure(&mut self, fetched_tasks: usize, last_error: Option<&ClientError>);

    /// Delay to apply before the next fetch cycle
    fn calculate_backoff_time(&self) -> Duration;
}

/// Adapter satisfying the error-aware contract with a plain strategy
///
/// The error parameter is deliberately ignored; the wrapped strategy sees only
/// the batch size.
pub struct ErrorAgnosticBackoff<S: BackoffStrategy> {
    inner: S,
}

impl<S: BackoffStrategy> ErrorAgnosticBackoff<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: BackoffStrategy> ErrorAwareBackoffStrategy for ErrorAgnosticBackoff<S> {
    fn reconfigure(&mut self, fetched_tasks: usize, _last_error: Option<&ClientError>) {
        self.inner.reconfigure(fetched_tasks);
    }

    fn calculate_backoff_time(&self) -> Duration {
        self.inner.calculate_backoff_time()
    }
}

/// Exponent levels beyond this cannot change the result of the clamp
const MAX_EXPONENT: u32 = 64;

/// Default exponential backoff: 0 on a non-empty fetch, otherwise
/// `min(max_delay, initial_delay * factor^(level-1))`
///
/// `level` grows by one per empty fetch and resets to zero on the first
/// non-empty one, so the delay sequence for consecutive empty polls with the
/// defaults is 0, 500ms, 1s, 2s, ... capped at 60s. A factor of exactly 1
/// yields a constant non-zero delay once any empty fetch occurred. The level
/// counter saturates and the exponent is clamped before exponentiation, so
/// arbitrarily long idle periods cannot overflow.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    factor: f64,
    max_delay: Duration,
    level: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 2.0, Duration::from_secs(60))
    }
}

impl ExponentialBackoff {
    /// Create a strategy with explicit parameters; `factor` must be >= 1
    pub fn new(initial_delay: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            factor: factor.max(1.0),
            max_delay,
            level: 0,
        }
    }

    /// Current escalation level, exposed for diagnostics
    pub fn level(&self) -> u32 {
        self.level
    }

    fn delay_for_level(&self) -> Duration {
        if self.level == 0 {
            return Duration::ZERO;
        }
        let exponent = (self.level - 1).min(MAX_EXPONENT);
        let millis = self.initial_delay.as_millis() as f64 * self.factor.powi(exponent as i32);
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            self.max_delay.min(Duration::from_millis(millis as u64))
        }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn reconfigure(&mut self, fetched_tasks: usize) {
        if fetched_tasks == 0 {
            self.level = self.level.saturating_add(1);
        } else {
            self.level = 0;
        }
    }

    fn calculate_backoff_time(&self) -> Duration {
        self.delay_for_level()
    }
}

/// Error-aware variant of [`ExponentialBackoff`]
///
/// A cycle that ended in a retryable error (connection lost, engine failure)
/// escalates like an empty fetch does, so a flapping engine is polled at the
/// backed-off cadence instead of full speed. Non-retryable errors do not
/// escalate: they will not heal by waiting, and the application sees them
/// regardless.
#[derive(Debug, Clone, Default)]
pub struct ExponentialErrorBackoff {
    inner: ExponentialBackoff,
}

impl ExponentialErrorBackoff {
    pub fn new(initial_delay: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            inner: ExponentialBackoff::new(initial_delay, factor, max_delay),
        }
    }
}

impl ErrorAwareBackoffStrategy for ExponentialErrorBackoff {
    fn reconfigure(&mut self, fetched_tasks: usize, last_error: Option<&ClientError>) {
        let errored = last_error.map(ClientError::is_retryable).unwrap_or(false);
        if errored {
            self.inner.level = self.inner.level.saturating_add(1);
        } else {
            self.inner.reconfigure(fetched_tasks);
        }
    }

    fn calculate_backoff_time(&self) -> Duration {
        self.inner.calculate_backoff_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_strategy() -> ExponentialBackoff {
        ExponentialBackoff::default()
    }

    #[test]
    fn strategies_are_shareable_across_threads() {
        // the poll loop future holds the boxed strategy while borrowing the
        // loop across awaits, so the trait objects must be Send + Sync
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn BackoffStrategy>();
        assert_send_sync::<dyn ErrorAwareBackoffStrategy>();
    }

    #[test]
    fn empty_polling_escalates_through_the_documented_sequence() {
        let mut backoff = default_strategy();

        // before any cycle
        assert_eq!(backoff.calculate_backoff_time(), Duration::ZERO);

        backoff.reconfigure(0);
        assert_eq!(backoff.calculate_backoff_time(), Duration::from_millis(500));

        backoff.reconfigure(0);
        assert_eq!(backoff.calculate_backoff_time(), Duration::from_millis(1000));

        backoff.reconfigure(0);
        assert_eq!(backoff.calculate_backoff_time(), Duration::from_millis(2000));
    }

    #[test]
    fn a_non_empty_fetch_resets_to_zero() {
        let mut backoff = default_strategy();
        for _ in 0..5 {
            backoff.reconfigure(0);
        }
        assert!(backoff.calculate_backoff_time() > Duration::ZERO);

        backoff.reconfigure(3);
        assert_eq!(backoff.calculate_backoff_time(), Duration::ZERO);
    }

    #[test]
    fn delay_is_clamped_at_max() {
        let mut backoff = default_strategy();
        for _ in 0..32 {
            backoff.reconfigure(0);
        }
        assert_eq!(backoff.calculate_backoff_time(), Duration::from_secs(60));
    }

    #[test]
    fn factor_of_one_is_a_constant_delay() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(250), 1.0, Duration::from_secs(60));
        backoff.reconfigure(0);
        assert_eq!(backoff.calculate_backoff_time(), Duration::from_millis(250));
        backoff.reconfigure(0);
        assert_eq!(backoff.calculate_backoff_time(), Duration::from_millis(250));
    }

    #[test]
    fn extreme_levels_saturate_instead_of_overflowing() {
        let mut backoff = default_strategy();
        backoff.level = u32::MAX - 1;
        backoff.reconfigure(0);
        backoff.reconfigure(0);
        assert_eq!(backoff.level(), u32::MAX);
        assert_eq!(backoff.calculate_backoff_time(), Duration::from_secs(60));
    }

    #[test]
    fn adapter_ignores_the_error_parameter() {
        let mut backoff = ErrorAgnosticBackoff::new(default_strategy());
        let err = ClientError::ConnectionLost("refused".into());

        ErrorAwareBackoffStrategy::reconfigure(&mut backoff, 1, Some(&err));
        assert_eq!(backoff.calculate_backoff_time(), Duration::ZERO);
    }

    #[test]
    fn error_aware_strategy_escalates_on_retryable_errors() {
        let mut backoff = ExponentialErrorBackoff::default();
        let err = ClientError::ConnectionLost("refused".into());

        // a connection error escalates even though tasks came back previously
        backoff.reconfigure(0, Some(&err));
        assert_eq!(backoff.calculate_backoff_time(), Duration::from_millis(500));

        backoff.reconfigure(0, Some(&err));
        assert_eq!(backoff.calculate_backoff_time(), Duration::from_millis(1000));

        // recovery resets
        backoff.reconfigure(2, None);
        assert_eq!(backoff.calculate_backoff_time(), Duration::ZERO);
    }

    #[test]
    fn error_aware_strategy_does_not_escalate_on_permanent_errors() {
        let mut backoff = ExponentialErrorBackoff::default();
        let err = ClientError::BadRequest("malformed".into());

        backoff.reconfigure(1, Some(&err));
        assert_eq!(backoff.calculate_backoff_time(), Duration::ZERO);
    }
}
