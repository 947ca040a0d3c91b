use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// What a fake cluster answers
#[derive(Debug, Clone)]
pub struct MockClusterState {
    pub status: Value,
    pub alerts: Vec<Value>,
    pub events: Vec<Value>,
    /// Required bearer token, if any
    pub token: Option<String>,
    pub ping: bool,
}

impl MockClusterState {
    pub fn healthy(nodes: u32, gpus: u32, score: f64) -> Self {
        Self {
            status: json!({
                "nodes": nodes,
                "healthy_nodes": nodes,
                "total_gpus": gpus,
                "healthy_gpus": gpus,
                "health_score": score,
                "alerts_active": 0,
                "version": "1.4.2",
                // Remote identity is ignored in favour of the registry entry
                "name": "remote-name",
            }),
            alerts: Vec::new(),
            events: Vec::new(),
            token: None,
            ping: true,
        }
    }
}

/// A fake remote cluster on 127.0.0.1
pub struct MockCluster {
    pub endpoint: String,
    state: Arc<Mutex<MockClusterState>>,
    limits: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockCluster {
    pub async fn start(state: MockClusterState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let limits = Arc::new(Mutex::new(Vec::new()));

        let app = Router::new()
            .route("/api/v1/ping", get(ping))
            .route("/api/v1/status", get(status))
            .route("/api/v1/alerts", get(alerts))
            .route("/api/v1/events", get(events))
            .route("/api/v1/version", get(version))
            .with_state(Shared {
                state: state.clone(),
                limits: limits.clone(),
            });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            endpoint: format!("http://{}", addr),
            state,
            limits,
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut MockClusterState)) {
        f(&mut self.state.lock());
    }

    /// `limit` query values seen by the events endpoint
    pub fn event_limits(&self) -> Vec<Option<String>> {
        self.limits.lock().clone()
    }
}

/// An endpoint nothing listens on
pub async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    format!("http://{}", listener.local_addr().unwrap())
}

/// An endpoint that accepts connections and never answers
pub async fn hanging_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

pub fn alert(name: &str, severity: &str, node: &str, fired_at: &str) -> Value {
    json!({
        "alert_name": name,
        "severity": severity,
        "node": node,
        "description": format!("{} on {}", name, node),
        "fired_at": fired_at,
        "state": "firing",
        // Overwritten with the registry name by the client
        "cluster": "spoofed",
    })
}

pub fn event(kind: &str, timestamp: &str) -> Value {
    json!({
        "type": kind,
        "severity": "warning",
        "message": kind,
        "timestamp": timestamp,
    })
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<MockClusterState>>,
    limits: Arc<Mutex<Vec<Option<String>>>>,
}

fn authorize(shared: &Shared, headers: &HeaderMap) -> Result<MockClusterState, Response> {
    let state = shared.state.lock().clone();
    if let Some(token) = &state.token {
        let expected = format!("Bearer {}", token);
        let given = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if given != expected {
            return Err((StatusCode::UNAUTHORIZED, "invalid token").into_response());
        }
    }
    Ok(state)
}

async fn ping(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    match authorize(&shared, &headers) {
        Ok(state) if state.ping => Json(json!({"status": "ok"})).into_response(),
        Ok(_) => StatusCode::NOT_FOUND.into_response(),
        Err(resp) => resp,
    }
}

async fn status(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    match authorize(&shared, &headers) {
        Ok(state) => Json(state.status).into_response(),
        Err(resp) => resp,
    }
}

async fn alerts(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    match authorize(&shared, &headers) {
        Ok(state) => Json(state.alerts).into_response(),
        Err(resp) => resp,
    }
}

async fn events(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    shared.limits.lock().push(params.get("limit").cloned());
    match authorize(&shared, &headers) {
        Ok(state) => Json(state.events).into_response(),
        Err(resp) => resp,
    }
}

async fn version(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    match authorize(&shared, &headers) {
        Ok(state) => Json(json!({"version": state.status["version"]})).into_response(),
        Err(resp) => resp,
    }
}
