use formatter::CustomFormatter;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::trace::TracerProvider;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use std::fmt::Display;
use std::time::Duration;
use tracing_core::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;
use url::Url;

mod formatter;

/// Target of the per-request RPC events, rendered on a single line by the formatter.
pub const RPC_CALLS_TARGET: &str = "funnel_rpc";

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub service_name: String,
    pub collection_endpoint: Option<Url>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self { service_name: "Funnel".into(), collection_endpoint: None }
    }
}

struct Providers {
    meter_provider: SdkMeterProvider,
    tracer_provider: SdkTracerProvider,
    logger_provider: SdkLoggerProvider,
}

pub struct AnalyticsService {
    providers: Option<Providers>,
    config: AnalyticsConfig,
}

impl AnalyticsService {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { providers: None, config }
    }

    /// Installs the global tracing subscriber, and the OTLP exporters when a collection endpoint is configured.
    pub fn setup(&mut self) -> anyhow::Result<()> {
        let tracing_subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().event_format(CustomFormatter::new()))
            .with(EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env()?);

        let Some(otel_endpoint) = &self.config.collection_endpoint else {
            tracing_subscriber.init();
            return Ok(());
        };

        let tracer_provider = self.init_tracer_provider(otel_endpoint)?;
        global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = self.init_meter_provider(otel_endpoint)?;
        global::set_meter_provider(meter_provider.clone());

        let logger_provider = self.init_logs_provider(otel_endpoint)?;
        tracing_subscriber
            .with(OpenTelemetryLayer::new(
                tracer_provider.tracer(format!("{}{}", self.config.service_name, "_subscriber")),
            ))
            .with(OpenTelemetryTracingBridge::new(&logger_provider))
            .init();

        self.providers = Some(Providers { meter_provider, tracer_provider, logger_provider });

        Ok(())
    }

    /// Flushes and stops the exporters, if any.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        if let Some(provider) = self.providers.take() {
            provider.logger_provider.shutdown()?;
            provider.meter_provider.shutdown()?;
            provider.tracer_provider.shutdown()?;
        }
        Ok(())
    }

    fn resource(&self, signal: &str) -> Resource {
        Resource::builder().with_service_name(format!("{}_{signal}_service", self.config.service_name)).build()
    }

    fn init_tracer_provider(&self, otel_endpoint: &Url) -> anyhow::Result<SdkTracerProvider> {
        let exporter =
            opentelemetry_otlp::SpanExporter::builder().with_tonic().with_endpoint(otel_endpoint.as_str()).build()?;

        let batch_config = BatchConfigBuilder::default().with_max_export_batch_size(128).build();

        let processor = BatchSpanProcessor::builder(exporter).with_batch_config(batch_config).build();

        let provider = SdkTracerProvider::builder()
            .with_span_processor(processor)
            .with_resource(self.resource("trace"))
            .build();

        Ok(provider)
    }

    fn init_meter_provider(&self, otel_endpoint: &Url) -> anyhow::Result<SdkMeterProvider> {
        let exporter =
            opentelemetry_otlp::MetricExporter::builder().with_tonic().with_endpoint(otel_endpoint.as_str()).build()?;

        // Creates a periodic reader that exports every 5 seconds
        let reader = PeriodicReader::builder(exporter).with_interval(Duration::from_secs(5)).build();

        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(self.resource("meter"))
            .build();
        Ok(provider)
    }

    fn init_logs_provider(&self, otel_endpoint: &Url) -> anyhow::Result<SdkLoggerProvider> {
        let exporter =
            opentelemetry_otlp::LogExporter::builder().with_tonic().with_endpoint(otel_endpoint.as_str()).build()?;

        Ok(SdkLoggerProvider::builder()
            .with_resource(self.resource("logs"))
            .with_batch_exporter(exporter)
            .build())
    }
}

pub trait GaugeType<T> {
    fn register_gauge(meter: &Meter, name: String, description: String, unit: String) -> Gauge<T>;
}

impl GaugeType<u64> for u64 {
    fn register_gauge(meter: &Meter, name: String, description: String, unit: String) -> Gauge<u64> {
        meter.u64_gauge(name).with_description(description).with_unit(unit).build()
    }
}

pub fn register_gauge_metric_instrument<T: GaugeType<T> + Display>(
    crate_meter: &Meter,
    instrument_name: String,
    desc: String,
    unit: String,
) -> Gauge<T> {
    T::register_gauge(crate_meter, instrument_name, desc, unit)
}

pub trait CounterType<T> {
    fn register_counter(meter: &Meter, name: String, description: String, unit: String) -> Counter<T>;
}

impl CounterType<u64> for u64 {
    fn register_counter(meter: &Meter, name: String, description: String, unit: String) -> Counter<u64> {
        meter.u64_counter(name).with_description(description).with_unit(unit).build()
    }
}

pub fn register_counter_metric_instrument<T: CounterType<T> + Display>(
    crate_meter: &Meter,
    instrument_name: String,
    desc: String,
    unit: String,
) -> Counter<T> {
    T::register_counter(crate_meter, instrument_name, desc, unit)
}

pub trait HistogramType<T> {
    fn register_histogram(meter: &Meter, name: String, description: String, unit: String) -> Histogram<T>;
}

impl HistogramType<f64> for f64 {
    fn register_histogram(meter: &Meter, name: String, description: String, unit: String) -> Histogram<f64> {
        meter.f64_histogram(name).with_description(description).with_unit(unit).build()
    }
}

pub fn register_histogram_metric_instrument<T: HistogramType<T> + Display>(
    crate_meter: &Meter,
    instrument_name: String,
    desc: String,
    unit: String,
) -> Histogram<T> {
    T::register_histogram(crate_meter, instrument_name, desc, unit)
}
