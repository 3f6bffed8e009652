//! HTTP client for the chat stream.
//!
//! Posts a message and reduces the streamed frames with the shared consumer.
//! No request timeout is set on the client; a stalled stream is cut off by
//! the consumer's silence timeout instead.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::error::{AppError, StreamError};
use crate::streaming::{consume, ChatState, ConsumeError, Frame};

/// Client for `POST /api/chat`.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    endpoint: String,
    silence: Duration,
}

impl ChatClient {
    pub fn new(config: &ClientConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .connect_timeout(config.silence_timeout())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            silence: config.silence_timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `message` and drive the reply stream to completion.
    ///
    /// `on_frame` is called after each frame is applied. A non-2xx reply is
    /// reported as `StreamError::Status` carrying the server's error message.
    pub async fn send<F>(
        &self,
        message: &str,
        cancel: watch::Receiver<bool>,
        on_frame: F,
    ) -> Result<ChatState, ConsumeError>
    where
        F: FnMut(&Frame, &ChatState),
    {
        let fail = |error: StreamError| ConsumeError::new(error, ChatState::pending());

        let request = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "message": message }))
            .send();

        let response = match tokio::time::timeout(self.silence, request).await {
            Err(_) => return Err(fail(StreamError::SilenceTimeout(self.silence.as_secs()))),
            Ok(Err(e)) => return Err(fail(StreamError::Transport(e.to_string()))),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            tracing::debug!(status = status.as_u16(), %message, "Chat request rejected");
            return Err(fail(StreamError::Status {
                status: status.as_u16(),
                message,
            }));
        }

        consume(Box::pin(response.bytes_stream()), self.silence, cancel, on_frame).await
    }
}
