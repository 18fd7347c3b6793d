//! # Structured Logging
//!
//! Installs the global `tracing` subscriber for the binary and offers helpers
//! for keeping secrets out of log output.
//!
//! ## Key Features
//! - JSON or human-readable output, chosen by configuration
//! - `RUST_LOG` takes precedence over the configured level
//! - Logs go to stderr so `dump` output on stdout stays machine-readable
//! - Header redaction for anything that looks like a credential

use std::collections::HashMap;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::LoggingConfig;
use crate::core::error::{SyncError, SyncResult};

/// Header names whose values never appear in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "kong-admin-token", "apikey", "cookie"];

/// Initialize the global tracing subscriber
///
/// Fails only on an unparseable level; a subscriber that is already installed
/// (common in tests) is left in place.
pub fn init_logging(config: &LoggingConfig) -> SyncResult<()> {
    let level = parse_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let installed = if config.format.eq_ignore_ascii_case("json") {
        Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if installed.is_ok() {
        debug!(level = %level, format = %config.format, "logging initialized");
    }
    Ok(())
}

fn parse_level(level: &str) -> SyncResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(SyncError::config(format!("Invalid log level: {}", other))),
    }
}

/// Copy of `headers` with sensitive values masked
pub fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive(name) {
                "[REDACTED]".to_string()
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

fn is_sensitive(name: &str) -> bool {
    let lower = name.to_lowercase();
    SENSITIVE_HEADERS.contains(&lower.as_str()) || lower.contains("token") || lower.contains("secret")
}
