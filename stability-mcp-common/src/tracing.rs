//! Tracing initialization.
//!
//! Logs always go to **stderr**: in stdio mode stdout carries the JSON-RPC
//! stream and any stray byte there corrupts the protocol.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls the log level and filtering. Examples:
//!   - `RUST_LOG=debug` - Enable debug logging for all modules
//!   - `RUST_LOG=stability_mcp_server=debug` - Enable debug for the server crate
//!   - `RUST_LOG=warn,stability_mcp_common=debug` - Warn by default, debug for common

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the tracing subscriber with `RUST_LOG` filtering (default `info`).
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
///
/// ```no_run
/// use stability_mcp_common::tracing::init_tracing;
///
/// init_tracing();
/// tracing::info!("Server starting");
/// ```
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer())
        .init();
}

/// Try to initialize tracing, returning an error if already initialized.
pub fn try_init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer())
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_tracing_does_not_panic() {
        let _ = try_init_tracing();
        let second = try_init_tracing();
        assert!(second.is_err(), "second initialization should be refused");
    }

    #[test]
    fn test_env_filter_parses_module_specific() {
        let filter = EnvFilter::new("warn,stability_mcp_common=debug");
        drop(filter);
    }
}
