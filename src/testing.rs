use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    http::{request::Builder, Request, StatusCode},
    Router,
};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::{build_router, config::Config, db, uploads::UploadStore, AppState};

const BOUNDARY: &str = "resale-inventory-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub pool: SqlitePool,
    pub static_dir: TempDir,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_limit(1024 * 1024).await
}

pub async fn spawn_app_with_limit(max_upload_bytes: usize) -> TestApp {
    let static_dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        static_dir: static_dir.path().to_path_buf(),
        max_upload_bytes,
        db_max_connections: 1,
    };

    let pool = db::memory_pool().await;
    let uploads = UploadStore::open(&config.static_dir)
        .await
        .expect("open upload store");
    let state = AppState {
        db: pool.clone(),
        uploads: Arc::new(uploads),
    };

    TestApp {
        router: build_router(state.clone(), &config),
        state,
        pool,
        static_dir,
    }
}

pub trait IntoTestRequest {
    fn into_test_request(self) -> Request<Body>;
}

impl IntoTestRequest for Request<Body> {
    fn into_test_request(self) -> Request<Body> {
        self
    }
}

impl IntoTestRequest for Builder {
    fn into_test_request(self) -> Request<Body> {
        self.body(Body::empty()).expect("request")
    }
}

pub async fn send(app: &TestApp, req: impl IntoTestRequest) -> (StatusCode, Bytes) {
    let resp = app
        .router
        .clone()
        .oneshot(req.into_test_request())
        .await
        .expect("router is infallible");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, bytes)
}

pub async fn send_json(app: &TestApp, req: impl IntoTestRequest) -> (StatusCode, serde_json::Value) {
    let (status, bytes) = send(app, req).await;
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => (b as char).to_string(),
            b' ' => "+".to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect()
}

pub fn urlencoded(method: &str, uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body = fields
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("request")
}

pub fn multipart(
    method: &str,
    uri: &str,
    fields: &[(&str, &str)],
    image: Option<(&str, &[u8])>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .expect("request")
}
