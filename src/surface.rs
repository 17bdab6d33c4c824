//! Operator surface — REST + WebSocket over the orchestrator.
//!
//! The display surface consumes the batch report and the live event stream;
//! it issues batch runs on operator action. No other control surface exists.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::pipeline::{BatchReport, Orchestrator};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub last_report: Arc<RwLock<Option<BatchReport>>>,
    pub running: Arc<AtomicBool>,
}

/// Build the Axum router for the operator surface.
pub fn routes(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState {
        orchestrator,
        last_report: Arc::new(RwLock::new(None)),
        running: Arc::new(AtomicBool::new(false)),
    };

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/api/batch/run", post(run_batch))
        .route("/api/batch/report", get(last_report))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "abm-outreach"
    }))
}

// ── Batch control ───────────────────────────────────────────────────────

async fn run_batch(State(state): State<AppState>) -> impl IntoResponse {
    if state.running.swap(true, Ordering::SeqCst) {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": "a batch is already running"})),
        );
    }

    info!("Batch run requested by operator");
    let orchestrator = Arc::clone(&state.orchestrator);
    let last_report = Arc::clone(&state.last_report);
    let running = Arc::clone(&state.running);

    tokio::spawn(async move {
        match orchestrator.run_batch().await {
            Ok(report) => {
                *last_report.write().await = Some(report);
            }
            Err(e) => {
                error!(error = %e, "Batch run failed");
            }
        }
        running.store(false, Ordering::SeqCst);
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"started": true})),
    )
}

async fn last_report(State(state): State<AppState>) -> impl IntoResponse {
    match state.last_report.read().await.clone() {
        Some(report) => (StatusCode::OK, Json(serde_json::json!(report))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no batch has completed yet"})),
        ),
    }
}

// ── WebSocket event stream ──────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("Event stream client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.orchestrator.subscribe();

    loop {
        tokio::select! {
            // Forward pipeline events to this client
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Event stream client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Event stream client lagged behind broadcast");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Event broadcast closed");
                        break;
                    }
                }
            }

            // Drain client frames (ping/close only — this stream is one-way)
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Event stream client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Event stream error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}
