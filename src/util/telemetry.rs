//! Logging and OpenTelemetry setup.
//!
//! Logs always go to stdout through the `tracing-subscriber` fmt layer, filtered by
//! `RUST_LOG` (default `info`). Built with the `telemetry` feature, traces and metrics are
//! also exported over OTLP when any of `OTEL_EXPORTER_OTLP_ENDPOINT`,
//! `OTEL_EXPORTER_OTLP_HEADERS` or `OTEL_EXPORTER_OTLP_PROTOCOL` is set.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::util::request_id::RequestSpan;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installed tracing subscriber, plus OpenTelemetry providers when exporting.
///
/// Flushes and shuts the providers down on drop.
#[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
pub struct Telemetry {
    name: &'static str,
    version: &'static str,
    #[cfg(feature = "telemetry")]
    providers: Option<otel::Providers>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            #[cfg(feature = "telemetry")]
            providers: None,
        }
    }

    /// Service name reported to OpenTelemetry.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Service version reported to OpenTelemetry.
    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Installs the global tracing subscriber. Call once per process.
    pub fn register(self) -> Self {
        #[cfg(feature = "telemetry")]
        if let Some(protocol) = otel::TelemetryProtocol::from_env() {
            return self.register_otel(protocol);
        }
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .init();
        tracing::info!("OpenTelemetry is not enabled");
        self
    }

    #[cfg(feature = "telemetry")]
    fn register_otel(mut self, protocol: otel::TelemetryProtocol) -> Self {
        use opentelemetry::trace::TracerProvider as _;
        use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};

        match otel::Providers::try_new(protocol, self.name, self.version) {
            Ok(providers) => {
                let tracer = providers.tracer_provider.tracer(self.name);
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(tracing_subscriber::fmt::layer())
                    .with(MetricsLayer::new(providers.meter_provider.clone()))
                    .with(OpenTelemetryLayer::new(tracer))
                    .init();
                tracing::info!(
                    "OpenTelemetry tracing and metrics exporter is enabled via {:?}",
                    protocol
                );
                self.providers = Some(providers);
            }
            Err(e) => {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(tracing_subscriber::fmt::layer())
                    .init();
                tracing::warn!(error = %e, "Failed to build OTLP exporter, logging locally only");
            }
        }
        self
    }

    /// HTTP request tracing, one span per request tagged with its request id.
    pub fn http_tracing(&self) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
        TraceLayer::new_for_http().make_span_with(RequestSpan)
    }
}

#[cfg(feature = "telemetry")]
impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(providers) = self.providers.take() {
            providers.shutdown();
        }
    }
}

#[cfg(feature = "telemetry")]
mod otel {
    use opentelemetry::{KeyValue, global};
    use opentelemetry_otlp::ExporterBuildError;
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider};
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
    use opentelemetry_semantic_conventions::SCHEMA_URL;
    use opentelemetry_semantic_conventions::attribute::{
        DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION,
    };
    use std::env;
    use std::time::Duration;

    /// OTLP transport.
    #[allow(clippy::upper_case_acronyms)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TelemetryProtocol {
        HTTP,
        GRPC,
    }

    impl TelemetryProtocol {
        /// `None` unless OTLP export is configured through the environment.
        pub fn from_env() -> Option<Self> {
            let is_enabled = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
                || env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
                || env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok();
            if !is_enabled {
                return None;
            }
            let protocol = match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
                Ok("grpc") => TelemetryProtocol::GRPC,
                _ => TelemetryProtocol::HTTP,
            };
            Some(protocol)
        }
    }

    pub struct Providers {
        pub tracer_provider: SdkTracerProvider,
        pub meter_provider: SdkMeterProvider,
    }

    impl Providers {
        pub fn try_new(
            protocol: TelemetryProtocol,
            name: &'static str,
            version: &'static str,
        ) -> Result<Self, ExporterBuildError> {
            let resource = resource(name, version);
            let tracer_provider = init_tracer_provider(protocol, resource.clone())?;
            let meter_provider = init_meter_provider(protocol, resource)?;
            Ok(Self {
                tracer_provider,
                meter_provider,
            })
        }

        pub fn shutdown(self) {
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("{err:?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
    }

    fn resource(name: &'static str, version: &'static str) -> Resource {
        let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
        Resource::builder()
            .with_service_name(name)
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_VERSION, version),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                ],
                SCHEMA_URL,
            )
            .build()
    }

    fn init_meter_provider(
        protocol: TelemetryProtocol,
        resource: Resource,
    ) -> Result<SdkMeterProvider, ExporterBuildError> {
        let exporter = opentelemetry_otlp::MetricExporter::builder();
        let exporter = match protocol {
            TelemetryProtocol::HTTP => exporter
                .with_http()
                .with_temporality(opentelemetry_sdk::metrics::Temporality::default())
                .build()?,
            TelemetryProtocol::GRPC => exporter
                .with_tonic()
                .with_temporality(opentelemetry_sdk::metrics::Temporality::default())
                .build()?,
        };
        let reader = PeriodicReader::builder(exporter)
            .with_interval(Duration::from_secs(30))
            .build();
        let meter_provider = MeterProviderBuilder::default()
            .with_resource(resource)
            .with_reader(reader)
            .build();
        global::set_meter_provider(meter_provider.clone());
        Ok(meter_provider)
    }

    fn init_tracer_provider(
        protocol: TelemetryProtocol,
        resource: Resource,
    ) -> Result<SdkTracerProvider, ExporterBuildError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder();
        let exporter = match protocol {
            TelemetryProtocol::HTTP => exporter.with_http().build()?,
            TelemetryProtocol::GRPC => exporter.with_tonic().build()?,
        };
        Ok(SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                1.0,
            ))))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build())
    }
}
