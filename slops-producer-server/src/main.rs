use envconfig::Envconfig;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use slops_producer::config::Config;
use slops_producer::server::serve;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutting down gracefully...");
}

/// Distributed tracing export is an external collaborator, so this stays a
/// thin optional layer: no export happens unless `otel_url` is set, and
/// nothing in the producer's own logic depends on it.
fn init_tracer(otel_url: &str, sampling_rate: f64) -> opentelemetry_sdk::trace::Tracer {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(otel_url);

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(opentelemetry_sdk::trace::config().with_sampler(
            opentelemetry_sdk::trace::Sampler::ParentBased(Box::new(
                opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(sampling_rate),
            )),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .expect("failed to install OTLP tracer");

    provider.tracer("slops-producer")
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("invalid configuration");

    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );

    let otel_layer = config.otel_url.as_ref().map(|url| {
        let tracer = init_tracer(url, config.otel_sampling_rate);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    let listener = TcpListener::bind(config.address)
        .await
        .expect("failed to bind listening socket");

    tracing::info!("listening on {}", config.address);

    serve(config, listener, shutdown()).await;
}
