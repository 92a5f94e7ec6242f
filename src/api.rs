//! Admin HTTP API.
//!
//! Two endpoints: `POST /api/send` pushes a message out through the live
//! chat connection, `GET /health` reports the connection phase.

use crate::supervisor::ConnectionStateHandle;
use crate::transport::ClientSlot;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct AppState {
    pub slot: ClientSlot,
    pub connection: ConnectionStateHandle,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/send", post(send_message))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    /// Raw recipient, a cellphone number.
    number: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    jid: String,
    delivered: bool,
}

async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>, AppError> {
    if request.number.trim().is_empty() || request.message.trim().is_empty() {
        return Err(AppError::BadRequest(
            "number and message are required".to_string(),
        ));
    }

    let client = state
        .slot
        .read()
        .await
        .clone()
        .ok_or_else(|| AppError::Unavailable("chat connection is not ready".to_string()))?;

    let jid = client
        .resolve_identity(request.number.trim())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| {
            AppError::BadRequest(format!("{} is not reachable on chat", request.number.trim()))
        })?;

    client
        .send_direct(&jid, &request.message)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(SendResponse {
        jid,
        delivered: true,
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    phase: crate::supervisor::ConnectionPhase,
    restart_attempts: u32,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.connection.lock().unwrap().clone();
    Json(HealthResponse {
        phase: snapshot.phase,
        restart_attempts: snapshot.restart_attempts,
    })
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}
