use std::future::ready;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State as AxumState};
use axum::http::Method;
use axum::{
    routing::{get, post},
    Router,
};
use health::HealthRegistry;
use tower_http::trace::TraceLayer;

use crate::dispatch::Dispatcher;
use crate::error::ProducerError;
use crate::event::{NewMessageRequest, MAX_BODY_BYTES};
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::sinks::EventSink;

pub struct AppState<S: EventSink + Send + Sync + 'static> {
    pub dispatcher: Arc<Dispatcher<S>>,
    pub health: HealthRegistry,
}

// Manual impl: `#[derive(Clone)]` would require `S: Clone`, but only the
// `Arc` around the dispatcher needs to be cheap to clone, not `S` itself.
impl<S: EventSink + Send + Sync + 'static> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            health: self.health.clone(),
        }
    }
}

async fn index() -> &'static str {
    "slops-producer"
}

async fn health_check<S: EventSink + Send + Sync + 'static>(
    AxumState(state): AxumState<AppState<S>>,
) -> health::HealthStatus {
    state.health.get_status()
}

/// Parses the body ourselves instead of taking axum's `Json<T>` extractor:
/// that extractor's rejections (`JsonRejection::JsonDataError`,
/// `JsonRejection::BytesRejection`) resolve to axum's own 422/413 responses
/// before this function ever runs, bypassing the 400 envelope the intake
/// path is supposed to return for malformed or oversized bodies.
async fn new_message<S: EventSink + Send + Sync + 'static>(
    AxumState(state): AxumState<AppState<S>>,
    body: Bytes,
) -> Result<(), ProducerError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(ProducerError::BodyTooLarge(MAX_BODY_BYTES));
    }
    let request: NewMessageRequest = serde_json::from_slice(&body)?;
    state.dispatcher.dispatch(request).await
}

async fn not_found() -> ProducerError {
    ProducerError::NotFound
}

async fn method_not_allowed(method: Method) -> ProducerError {
    ProducerError::MethodNotAllowed(method.to_string())
}

pub fn router<S: EventSink + Send + Sync + 'static>(state: AppState<S>, metrics: bool) -> Router {
    let router = Router::new()
        .route("/", get(index).fallback(method_not_allowed))
        .route("/new", post(new_message::<S>).fallback(method_not_allowed))
        .route("/health", get(health_check::<S>).fallback(method_not_allowed))
        // A generous backstop well above `MAX_BODY_BYTES`: the spec's 1 MiB
        // cap is enforced explicitly in `new_message` so it can return the
        // `{"error": ...}` envelope; this layer only guards against bodies
        // pathological enough that they shouldn't be buffered at all.
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES * 4))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .fallback(not_found)
        .with_state(state);

    // Installing a global Prometheus recorder while this crate is used as a
    // library (e.g. from tests) does not work well, so metrics export is
    // opt-in.
    if metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route(
            "/metrics",
            get(move || ready(recorder_handle.render())).fallback(method_not_allowed),
        )
    } else {
        router
    }
}
