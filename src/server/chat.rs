//! Streaming chat endpoint.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderName};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{AppState, FRAME_BUFFER};
use crate::error::ApiError;
use crate::streaming::FrameWriter;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: Option<String>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /api/chat`: validate, then stream frames from a spawned session.
///
/// Validation failures are answered with a JSON error and no stream.
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::Validation("Invalid JSON body".to_string()))?;

    if state.shutdown.is_shutdown() {
        return Err(ApiError::Upstream("Server is shutting down".to_string()));
    }

    let mut session = state.producer.open(request.message.as_deref())?;
    let guard = state.shutdown.register_session(session.id());
    let shutdown_rx = guard.subscribe();
    let (writer, mut rx) = FrameWriter::channel(FRAME_BUFFER, state.write_timeout);

    tracing::debug!(
        session_id = %session.id(),
        fragments = session.fragments().len(),
        "Chat session opened"
    );

    tokio::spawn(async move {
        let _guard = guard;
        // Outcome is logged and counted by the session itself.
        let _ = session.run(writer, shutdown_rx).await;
    });

    let body = Body::from_stream(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response())
}
