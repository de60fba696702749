use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Error taxonomy for the intake path. `MalformedInput` maps to a 400,
/// everything else the intake path can surface becomes a 500 — broker
/// submission and outcome handling are asynchronous and are never surfaced
/// per-request.
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("failed to parse request: {0}")]
    MalformedInput(#[from] serde_json::Error),

    #[error("request body exceeds the maximum size of {0} bytes")]
    BodyTooLarge(usize),

    #[error("the requested resource could not be found")]
    NotFound,

    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ProducerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProducerError::MalformedInput(_) | ProducerError::BodyTooLarge(_) => {
                StatusCode::BAD_REQUEST
            }
            ProducerError::NotFound => StatusCode::NOT_FOUND,
            ProducerError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProducerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
