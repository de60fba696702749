use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` on `bind` and serve `router` on it. Used for the
/// consumer's metrics/health endpoint, which runs alongside the consume
/// loop rather than gating it.
pub async fn serve(router: Router, bind: std::net::SocketAddr) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await
}

pub fn setup_metrics_router(health: health::HealthRegistry, metrics: bool) -> Router {
    let router = Router::new().route(
        "/health",
        get(move || {
            let health = health.clone();
            async move { health.get_status() }
        }),
    );

    if metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
    } else {
        router
    }
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)
        .unwrap()
        .install_recorder()
        .unwrap()
}
