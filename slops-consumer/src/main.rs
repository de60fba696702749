use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use futures::future::{select, Either};
use health::HealthRegistry;

use slops_consumer::config::Config;
use slops_consumer::handoff::LoggingHooks;
use slops_consumer::{consumer, metrics};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let health = HealthRegistry::new("liveness");
    let liveness = Arc::new(
        health
            .register("consumer".to_string(), time::Duration::seconds(30))
            .await,
    );

    let consume_loop = Box::pin(consumer::run(
        &config,
        Arc::new(LoggingHooks),
        Some(liveness),
    ));

    let metrics_router = metrics::setup_metrics_router(health, config.export_prometheus);
    let metrics_server = Box::pin(metrics::serve(metrics_router, config.address));

    tracing::info!("slops-consumer listening on {}", config.address);

    match select(consume_loop, metrics_server).await {
        Either::Left((_, _)) => {
            tracing::error!("consume loop exited");
        }
        Either::Right((result, _)) => match result {
            Ok(_) => {}
            Err(err) => tracing::error!("metrics server failed: {}", err),
        },
    };

    // give in-flight commits a moment before the process actually exits
    tokio::time::sleep(Duration::from_millis(100)).await;
}
