//! Structured logging initialization, shared by every binary in the workspace.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize global tracing based on `RUST_LOG` and `LOG_FORMAT`.
///
/// `LOG_FORMAT=json` emits newline-delimited JSON events; anything else (or
/// unset) emits the default human-readable text format. `service_name` is
/// attached to every event as a static field.
pub fn init_logging(service_name: &'static str) {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    match format.as_str() {
        "json" => init_json_logging(service_name),
        _ => init_text_logging(service_name),
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_json_logging(service_name: &'static str) {
    use tracing_subscriber::prelude::*;
    let subscriber = tracing_subscriber::registry().with(env_filter()).with(
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true),
    );
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::info!(service = service_name, format = "json", "logging initialized");
    }
}

fn init_text_logging(service_name: &'static str) {
    use tracing_subscriber::prelude::*;
    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true));
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::info!(service = service_name, format = "text", "logging initialized");
    }
}
