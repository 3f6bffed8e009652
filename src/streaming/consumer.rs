//! Chat stream consumer.
//!
//! Reads raw bytes from a transport, decodes frames and folds them into a
//! `ChatState`. The transport is always drained to completion; a stalled
//! transport is cut off after a silence timeout.

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::watch;

use super::frame::{Frame, FrameDecoder};
use crate::error::StreamError;
use crate::shutdown::wait_for_shutdown;

/// Renderable state of one assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatState {
    /// Id from the start frame, once seen.
    pub session_id: Option<String>,
    /// Concatenation of every chunk so far.
    pub text: String,
    /// True until an end frame arrives or the stream is abandoned.
    pub is_streaming: bool,
    /// Blocks the decoder dropped (bad JSON, bad UTF-8, truncated tail).
    pub malformed_frames: u64,
    ended: bool,
}

impl ChatState {
    /// Placeholder for a reply that is about to stream.
    pub fn pending() -> Self {
        Self {
            session_id: None,
            text: String::new(),
            is_streaming: true,
            malformed_frames: 0,
            ended: false,
        }
    }

    /// Apply one frame in arrival order.
    pub fn apply(&mut self, frame: Frame) {
        if self.ended {
            tracing::debug!(kind = frame.kind(), "Ignoring frame after end");
            return;
        }
        match frame {
            Frame::Start { id } => self.session_id = Some(id),
            Frame::Chunk { content } => self.text.push_str(&content),
            Frame::End => {
                self.is_streaming = false;
                self.ended = true;
            }
        }
    }

    /// Whether an end frame has been applied.
    pub fn is_complete(&self) -> bool {
        self.ended
    }

    fn abandon(&mut self) {
        self.is_streaming = false;
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::pending()
    }
}

/// A consume failure together with whatever text had arrived.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ConsumeError {
    pub error: StreamError,
    pub state: ChatState,
}

impl ConsumeError {
    pub fn new(error: StreamError, mut state: ChatState) -> Self {
        state.abandon();
        Self { error, state }
    }
}

/// Drive `transport` to completion, reducing frames into a `ChatState`.
///
/// `on_frame` sees every frame after it has been applied. Returns an error
/// (with `is_streaming` forced off) on cancellation, on `silence` elapsing
/// without bytes, on a transport error, or when the transport ends without
/// an end frame.
pub async fn consume<S, E, F>(
    mut transport: S,
    silence: Duration,
    mut cancel: watch::Receiver<bool>,
    mut on_frame: F,
) -> Result<ChatState, ConsumeError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
    F: FnMut(&Frame, &ChatState),
{
    let mut decoder = FrameDecoder::new();
    let mut state = ChatState::pending();

    loop {
        let next = tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut cancel) => {
                return Err(ConsumeError::new(StreamError::Cancelled, state));
            }

            next = tokio::time::timeout(silence, transport.next()) => next,
        };

        match next {
            Err(_) => {
                tracing::warn!(
                    silence_ms = silence.as_millis() as u64,
                    pending_bytes = decoder.pending(),
                    "Stream went silent"
                );
                return Err(ConsumeError::new(
                    StreamError::SilenceTimeout(silence.as_secs()),
                    state,
                ));
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                return Err(ConsumeError::new(
                    StreamError::Transport(e.to_string()),
                    state,
                ));
            }
            Ok(Some(Ok(bytes))) => {
                for frame in decoder.push(&bytes) {
                    let observed = frame.clone();
                    state.apply(frame);
                    on_frame(&observed, &state);
                }
                state.malformed_frames = decoder.malformed();
            }
        }
    }

    decoder.finish();
    state.malformed_frames = decoder.malformed();
    if state.malformed_frames > 0 {
        tracing::warn!(malformed = state.malformed_frames, "Dropped undecodable frames");
    }

    if state.is_complete() {
        Ok(state)
    } else {
        Err(ConsumeError::new(StreamError::Incomplete, state))
    }
}
