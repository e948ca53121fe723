pub mod form;
pub mod products;

use axum::{http::StatusCode, response::Html, Json};
use serde_json::json;

pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok", "service": "resale-inventory" })))
}

/// Main page. Its script and styles are served from `/static`.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../../templates/index.html"))
}
