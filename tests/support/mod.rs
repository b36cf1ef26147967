//! Fake application-under-test E2E server for integration tests.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SESSION_ID: &str = "session-1";

/// 1x1 transparent PNG
pub const PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// What the fake app answers
#[derive(Clone)]
pub struct FakeApp {
    /// Status bodies in order; the last one repeats
    pub statuses: Vec<Value>,
    pub result: Value,
    /// Raw body served by the result route instead of `result`
    pub raw_result: Option<String>,
    /// Number of submissions answered with `submit_error_status` before succeeding
    pub submit_failures: usize,
    pub submit_error_status: u16,
    /// Answer every session status request with this code
    pub status_error: Option<u16>,
    pub healthy: bool,
}

impl FakeApp {
    /// Runs through 30%, 60%, 100% and completes with a single `login` screenshot
    pub fn completing() -> Self {
        Self {
            statuses: vec![
                json!({"status": "running", "progress": 0.3, "current_step": 1, "total_steps": 3}),
                json!({"status": "running", "progress": 0.6, "current_step": 2, "total_steps": 3}),
                json!({"status": "running", "progress": 1.0, "current_step": 3, "total_steps": 3}),
                json!({"status": "completed", "progress": 1.0, "current_step": 3, "total_steps": 3}),
            ],
            result: json!({
                "status": "completed",
                "screenshots": [{"name": "login", "data": PNG_BASE64}],
                "logs": [
                    {"timestamp": "2024-01-01T00:00:00Z", "level": "info", "message": "step 1"},
                    {"timestamp": "2024-01-01T00:00:01Z", "level": "info", "message": "step 2"}
                ],
                "error": null
            }),
            raw_result: None,
            submit_failures: 0,
            submit_error_status: 503,
            status_error: None,
            healthy: true,
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            statuses: vec![
                json!({"status": "running", "progress": 0.5}),
                json!({"status": "failed", "progress": 0.5}),
            ],
            result: json!({"status": "failed", "screenshots": [], "logs": [], "error": error}),
            ..Self::completing()
        }
    }

    pub fn never_finishing() -> Self {
        Self {
            statuses: vec![json!({"status": "running", "progress": 0.1})],
            ..Self::completing()
        }
    }
}

pub struct FakeState {
    app: FakeApp,
    failures_left: AtomicUsize,
    status_index: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub result_calls: AtomicUsize,
    pub health_calls: AtomicUsize,
    pub submitted: Mutex<Vec<Value>>,
}

pub struct FakeServer {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeServer {
    pub async fn start(app: FakeApp) -> Self {
        let state = Arc::new(FakeState {
            failures_left: AtomicUsize::new(app.submit_failures),
            app,
            status_index: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/e2e/run", post(submit))
            .route("/e2e/status/:id", get(status))
            .route("/e2e/result/:id", get(result))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn submit_calls(&self) -> usize {
        self.state.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.state.status_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> usize {
        self.state.result_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.state.health_calls.load(Ordering::SeqCst)
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn submit(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    state.submit_calls.fetch_add(1, Ordering::SeqCst);

    let failing = state
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        let code = StatusCode::from_u16(state.app.submit_error_status).unwrap();
        return (code, "unavailable").into_response();
    }

    state.submitted.lock().unwrap().push(body);
    Json(json!({"session_id": SESSION_ID, "status": "running"})).into_response()
}

async fn status(State(state): State<Arc<FakeState>>, Path(id): Path<String>) -> Response {
    if id == "health" {
        state.health_calls.fetch_add(1, Ordering::SeqCst);
        return if state.app.healthy {
            Json(json!({"status": "ok"})).into_response()
        } else {
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        };
    }
    if id != SESSION_ID {
        return StatusCode::NOT_FOUND.into_response();
    }

    state.status_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(code) = state.app.status_error {
        return StatusCode::from_u16(code).unwrap().into_response();
    }
    let index = state.status_index.fetch_add(1, Ordering::SeqCst);
    let statuses = &state.app.statuses;
    Json(statuses[index.min(statuses.len() - 1)].clone()).into_response()
}

async fn result(State(state): State<Arc<FakeState>>, Path(id): Path<String>) -> Response {
    if id != SESSION_ID {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.result_calls.fetch_add(1, Ordering::SeqCst);

    match state.app.raw_result {
        Some(ref raw) => raw.clone().into_response(),
        None => Json(state.app.result.clone()).into_response(),
    }
}
