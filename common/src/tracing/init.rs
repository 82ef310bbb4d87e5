use crate::config::env_flag;
use crate::error::{MagSqlError, Result};
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_sdk::Resource;
use std::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const TRACING_FLAG: &str = "MAGSQL_ENABLE_TRACING";

/// flushes exported spans when dropped
pub struct OtelGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl OtelGuard {
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("error shutting down tracer provider: {}", e);
            }
        }
    }
}

fn collector_endpoint() -> Option<String> {
    env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .or_else(|_| env::var("PHOENIX_COLLECTOR_ENDPOINT"))
        .ok()
        .filter(|s| !s.trim().is_empty())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

/// console logging, plus otlp span export when enabled and an endpoint is set
pub fn init_tracing(service_name: &str) -> Result<OtelGuard> {
    let endpoint = match collector_endpoint() {
        Some(endpoint) if env_flag(TRACING_FLAG) => endpoint,
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .finish()
                .try_init()
                .map_err(|e| MagSqlError::Tracing(e.to_string()))?;

            tracing::debug!(service = service_name, "console logging initialized");
            return Ok(OtelGuard {
                tracer_provider: None,
            });
        }
    };

    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
        .map_err(|e| MagSqlError::Tracing(format!("exporter build failed: {}", e)))?;

    let resource = Resource::builder_empty()
        .with_attribute(KeyValue::new("service.name", service_name.to_string()))
        .build();

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let telemetry =
        tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()));

    tracing_subscriber::registry()
        .with(telemetry)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter())
        .try_init()
        .map_err(|e| MagSqlError::Tracing(e.to_string()))?;

    tracing::info!(
        service = service_name,
        endpoint = %endpoint,
        "opentelemetry tracing initialized"
    );

    Ok(OtelGuard {
        tracer_provider: Some(provider),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_without_endpoint() {
        if env_flag(TRACING_FLAG) {
            return;
        }
        let guard = init_tracing("magsql-test").unwrap();
        assert!(!guard.is_exporting());
    }
}
