//! Telemetry bootstrap: structured logs, OpenTelemetry spans and metrics,
//! and the process-wide panic hook.
//!
//! Returns a guard that flushes exporters on drop. Panics are counted in
//! the `sophrosyne.panics` metric, logged, and re-raised through the
//! previous hook, never swallowed.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{Config, LogFormat, TelemetryOutput};

const SERVICE_NAME: &str = "sophrosyne";

/// Flushes telemetry pipelines on drop.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to shut down tracer provider: {e}");
            }
        }
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to shut down meter provider: {e}");
            }
        }
    }
}

/// Initialize the whole stack. Call exactly once, before serving.
pub fn init(config: &Config) -> TelemetryGuard {
    let resource = Resource::builder()
        .with_attributes([opentelemetry::KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            SERVICE_NAME,
        )])
        .build();

    let tracer_provider = config.tracing.enabled.then(|| {
        let batch_config = BatchConfigBuilder::default()
            .with_scheduled_delay(config.tracing.batch_timeout)
            .build();
        let processor = match config.tracing.output {
            TelemetryOutput::Http => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .build()
                    .expect("failed to build OTLP span exporter");
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batch_config)
                    .build()
            }
            TelemetryOutput::Stdout => {
                let exporter = opentelemetry_stdout::SpanExporter::default();
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batch_config)
                    .build()
            }
        };
        SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_span_processor(processor)
            .build()
    });

    let meter_provider = config.metrics.enabled.then(|| {
        let provider = match config.metrics.output {
            TelemetryOutput::Http => {
                let exporter = opentelemetry_otlp::MetricExporter::builder()
                    .with_http()
                    .build()
                    .expect("failed to build OTLP metric exporter");
                let reader = PeriodicReader::builder(exporter)
                    .with_interval(config.metrics.interval)
                    .build();
                SdkMeterProvider::builder()
                    .with_resource(resource)
                    .with_reader(reader)
                    .build()
            }
            TelemetryOutput::Stdout => {
                let exporter = opentelemetry_stdout::MetricExporter::default();
                let reader = PeriodicReader::builder(exporter)
                    .with_interval(config.metrics.interval)
                    .build();
                SdkMeterProvider::builder()
                    .with_resource(resource)
                    .with_reader(reader)
                    .build()
            }
        };
        opentelemetry::global::set_meter_provider(provider.clone());
        provider
    });

    init_subscriber(config, tracer_provider.as_ref());
    install_panic_hook();

    TelemetryGuard {
        tracer_provider,
        meter_provider,
    }
}

fn init_subscriber(config: &Config, tracer_provider: Option<&SdkTracerProvider>) {
    let env_filter = if config.logging.enabled {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()))
    } else {
        EnvFilter::new("off")
    };

    // The fmt layer and the otel layer must both be created inside each
    // arm because their types depend on the output format.
    match config.logging.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true);
            let otel_layer = tracer_provider.map(|provider| {
                tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME))
            });
            Registry::default()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
        }
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
            let otel_layer = tracer_provider.map(|provider| {
                tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME))
            });
            Registry::default()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
        }
    }
}

/// Count and log panics, then hand off to the previous hook so the panic
/// still propagates.
fn install_panic_hook() {
    let counter = opentelemetry::global::meter(SERVICE_NAME)
        .u64_counter("sophrosyne.panics")
        .build();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        counter.add(1, &[]);
        tracing::error!(panic = %info, "panic");
        previous(info);
    }));
}
