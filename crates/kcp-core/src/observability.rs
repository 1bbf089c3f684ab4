//! Observability infrastructure for the control plane.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and span constructors used by the orchestration engine.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `kcp_orchestration=debug`)
///
/// # Example
///
/// ```rust
/// use kcp_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for orchestration-level work.
///
/// # Example
///
/// ```rust
/// use kcp_core::observability::orchestration_span;
///
/// let span = orchestration_span("execute", "01HQXYZ", "upgradeKyma");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn orchestration_span(operation: &str, orchestration_id: &str, kind: &str) -> Span {
    tracing::info_span!(
        "orchestration",
        op = operation,
        orchestration_id = orchestration_id,
        kind = kind,
    )
}

/// Creates a span for work on a single runtime operation.
#[must_use]
pub fn operation_span(orchestration_id: &str, operation_id: &str, runtime_id: &str) -> Span {
    tracing::info_span!(
        "runtime_operation",
        orchestration_id = orchestration_id,
        operation_id = operation_id,
        runtime_id = runtime_id,
    )
}
