//! Shared logging utilities for consistent tracing across the supervisor

use crate::types::ComponentId;
use chrono::{DateTime, Utc};
use tracing::{error, info};

/// Build the filter directive for the supervisor crates at the given base level
pub fn filter_directive(log_level: Option<&str>) -> String {
    let base_level = log_level.unwrap_or("info");
    format!("supervisor={base_level},shared={base_level},tower_http=warn,hyper=warn,reqwest=warn")
}

/// Initialize tracing subscriber with an optional log level
///
/// `RUST_LOG` wins over the level passed on the command line when it is set.
pub fn init_tracing_with_level(log_level: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Mask a secret for display, keeping only its length hint
pub fn mask_secret(value: &str) -> String {
    "*".repeat(value.chars().count().min(16))
}

/// Macro for component-aware info logging
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(
            process = %$component,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for component-aware warning logging
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(
            process = %$component,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for component-aware error logging
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(
            process = %$component,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for component-aware debug logging
#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(
            process = %$component,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(component: &ComponentId, details: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "🚀 Starting {}",
        details
    );
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(component: &ComponentId, reason: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "🛑 Shutting down: {}",
        reason
    );
}

/// Contextual logging helper for error conditions
pub fn log_error(component: &ComponentId, context: &str, error: &dyn std::fmt::Display) {
    error!(
        process = %component,
        timestamp = format_timestamp(),
        error = %error,
        "❌ {} failed: {}",
        context,
        error
    );
}

/// Contextual logging helper for success conditions
pub fn log_success(component: &ComponentId, message: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "✅ {}",
        message
    );
}

/// Contextual logging helper for progress updates
pub fn log_progress(component: &ComponentId, action: &str, details: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "📋 {}: {}",
        action,
        details
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_uses_level() {
        let directive = filter_directive(Some("debug"));
        assert!(directive.starts_with("supervisor=debug"));
        assert!(directive.contains("shared=debug"));

        assert!(filter_directive(None).starts_with("supervisor=info"));
    }

    #[test]
    fn test_mask_secret_caps_length() {
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret(&"x".repeat(40)).len(), 16);
    }
}
