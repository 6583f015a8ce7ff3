//! Chat routes: send a prompt to a room and list active rooms.

use crate::error::ApiError;
use aichat_conversation::{ConversationService, RoomSummary};
use aichat_core::RoomId;
use axum::{
    Form, Json, Router,
    extract::{FromRequest, FromRequestParts, Query, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state for the chat routes.
#[derive(Clone)]
pub struct AppState {
    service: Arc<ConversationService>,
}

impl AppState {
    /// Creates the state around a shared conversation service.
    pub fn new(service: Arc<ConversationService>) -> Self {
        Self { service }
    }
}

/// Parameters for `POST /api/chat/send`.
///
/// Read from an `application/x-www-form-urlencoded` body when the request
/// carries one, otherwise from the query string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendParams {
    room_id: RoomId,
    prompt: String,
}

impl<S> FromRequest<S> for SendParams
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(params) = Form::<Self>::from_request(req, state)
                .await
                .map_err(|rejection| bad_request(rejection.body_text()))?;
            Ok(params)
        } else {
            let (mut parts, _body) = req.into_parts();
            let Query(params) = Query::<Self>::from_request_parts(&mut parts, state)
                .await
                .map_err(|rejection| bad_request(rejection.body_text()))?;
            Ok(params)
        }
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

/// Builds the application router.
pub fn router(service: Arc<ConversationService>) -> Router {
    Router::new()
        .route("/api/chat/send", post(send))
        .route("/api/chat/rooms", get(rooms))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(service))
}

/// Sends a prompt to a room and returns the assistant's reply as text.
pub async fn send(State(state): State<AppState>, params: SendParams) -> Result<String, ApiError> {
    state
        .service
        .converse(params.room_id, &params.prompt)
        .await
        .map_err(|report| {
            let start_token = state.service.policy().start_tokens().first().cloned();
            ApiError::new(report, start_token)
        })
}

/// Lists every active room with its transcript.
pub async fn rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.service.list_rooms())
}

/// Liveness check.
pub async fn health() -> &'static str {
    "ok"
}
