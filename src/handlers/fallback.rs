use axum::{Json, http::StatusCode, http::Uri, response::IntoResponse};

// Paths this gateway does not serve itself, e.g. /api/auth/* owned by the auth service
pub async fn fallback_handler(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": {
                "code": "NOT_FOUND",
                "message": format!("no route for {}", uri.path()),
            }
        })),
    )
}
