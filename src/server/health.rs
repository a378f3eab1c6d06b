//! Liveness endpoint.

use axum::http::StatusCode;

/// Returns 200 with the text "OK" while the process is serving requests.
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
///
/// OK
/// ```
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
