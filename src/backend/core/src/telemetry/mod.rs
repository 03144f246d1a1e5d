//! Telemetry: logging, optional OTLP tracing and Prometheus metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use castellan_core::telemetry::{init, TelemetryConfig};
//!
//! let config = TelemetryConfig::default();
//! init(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{
    LogFormat, LoggingConfig, RedactingMakeWriter, RedactingWriter, RedactionConfig,
    RedactionPattern, SensitiveFieldRedactor,
};
pub use metrics::{init_metrics, StoreTimer};

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::config::ObservabilityConfig;

/// Unified telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for identification in traces and metrics
    pub service_name: String,

    /// OpenTelemetry OTLP endpoint; tracing export is off when absent.
    pub otlp_endpoint: Option<String>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "castellan".to_string(),
            otlp_endpoint: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl From<&ObservabilityConfig> for TelemetryConfig {
    fn from(config: &ObservabilityConfig) -> Self {
        Self {
            service_name: "castellan".to_string(),
            otlp_endpoint: config.otlp_endpoint.clone(),
            logging: LoggingConfig {
                level: config.log_level.clone(),
                format: if config.json_logging {
                    LogFormat::Json
                } else {
                    LogFormat::Pretty
                },
                ..LoggingConfig::default()
            },
        }
    }
}

/// Initialize the observability stack.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    SensitiveFieldRedactor::install(&config.logging.redaction);

    let filter = config.logging.env_filter()?;
    let location = config.logging.include_location;

    let fmt_layer = match config.logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(RedactingMakeWriter)
            .with_file(location)
            .with_line_number(location)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(RedactingMakeWriter)
            .with_file(location)
            .with_line_number(location)
            .boxed(),
    };

    // Set up OpenTelemetry tracing if endpoint is provided
    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(opentelemetry_sdk::trace::config().with_resource(
                    opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                        "service.name",
                        config.service_name.clone(),
                    )]),
                ))
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// Flush and shut down OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
