//! # Structured Logging
//!
//! Optional tracing initialization for binaries and tests. Library users who
//! already install their own subscriber should skip this; the client emits
//! `tracing` events regardless of who collects them.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install a console tracing subscriber, once per process
///
/// The filter comes from `RUST_LOG`, defaulting to `info` plus `debug` for
/// this crate. Safe to call repeatedly and safe to call when another
/// subscriber is already installed.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,exttask_client=debug"));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(filter),
        );

        // Another subscriber may already be installed by the host application
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already installed, keeping it");
        }
    });
}
