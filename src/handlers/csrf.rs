use axum::{Extension, Json, response::IntoResponse};

use crate::csrf::{CSRF_HEADER, CsrfToken};

// Token for the page script to echo back in the header
pub async fn csrf_handler(Extension(CsrfToken(token)): Extension<CsrfToken>) -> impl IntoResponse {
    Json(serde_json::json!({
        "token": token,
        "header": CSRF_HEADER,
    }))
}
