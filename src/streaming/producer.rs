//! Chat stream producer.
//!
//! A session walks `Idle -> Started -> Emitting(i) -> Ended -> Closed`:
//! one start frame, a thinking delay, one chunk per fragment (each preceded
//! by the fragment delay), then one end frame with no extra delay.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::frame::Frame;
use super::timer::Timer;
use super::writer::FrameWriter;
use crate::config::StreamConfig;
use crate::error::{ApiError, StreamError};
use crate::metrics;
use crate::responses::ResponseTable;
use crate::session::SessionIdGenerator;
use crate::shutdown::wait_for_shutdown;

/// Delays and limits applied to every session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub thinking_delay: Duration,
    pub fragment_delay: Duration,
    pub max_session: Duration,
}

impl Pacing {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            thinking_delay: config.thinking_delay(),
            fragment_delay: config.fragment_delay(),
            max_session: config.max_session(),
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    Started,
    Emitting(usize),
    Ended,
    Closed,
}

/// Builds sessions from injected table, id generator and timer.
#[derive(Clone)]
pub struct ChatProducer {
    table: Arc<ResponseTable>,
    ids: Arc<dyn SessionIdGenerator>,
    timer: Arc<dyn Timer>,
    pacing: Pacing,
}

impl ChatProducer {
    pub fn new(
        table: Arc<ResponseTable>,
        ids: Arc<dyn SessionIdGenerator>,
        timer: Arc<dyn Timer>,
        pacing: Pacing,
    ) -> Self {
        Self {
            table,
            ids,
            timer,
            pacing,
        }
    }

    /// Validate the input and prepare a session. No frame is produced here;
    /// a rejected message never reaches `Started`.
    pub fn open(&self, message: Option<&str>) -> Result<ChatSession, ApiError> {
        let message = message
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ApiError::Validation("Message is required".to_string()))?;

        let fragments = self.table.select(message).to_vec();

        Ok(ChatSession {
            id: self.ids.next_id(),
            fragments,
            timer: self.timer.clone(),
            pacing: self.pacing,
            state: ProducerState::Idle,
        })
    }
}

/// Summary of a session that reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub chunks: usize,
    pub frames: u64,
    pub bytes: u64,
}

/// One request's stream: fragments, cursor and timer.
pub struct ChatSession {
    id: String,
    fragments: Vec<String>,
    timer: Arc<dyn Timer>,
    pacing: Pacing,
    state: ProducerState,
}

impl ChatSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// Emit the full frame sequence into `writer`.
    ///
    /// Stops early on shutdown, on the session deadline, or when the consumer
    /// goes away. Frames already written stay written; the writer is dropped
    /// on return, which closes the transport.
    pub async fn run(
        &mut self,
        mut writer: FrameWriter,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SessionSummary, StreamError> {
        let started = Instant::now();
        let max_session = self.pacing.max_session;
        metrics::record_session_start();

        let result = tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut shutdown) => Err(StreamError::Cancelled),

            emitted = tokio::time::timeout(max_session, self.emit(&mut writer)) => {
                match emitted {
                    Ok(result) => result,
                    Err(_) => Err(StreamError::SessionTimeout(max_session.as_secs())),
                }
            }
        };

        self.state = ProducerState::Closed;
        drop(writer);

        metrics::record_session_end(&result, started.elapsed());
        match &result {
            Ok(summary) => tracing::info!(
                session_id = %self.id,
                chunks = summary.chunks,
                frames = summary.frames,
                bytes = summary.bytes,
                duration_ms = started.elapsed().as_millis() as u64,
                "Stream completed"
            ),
            Err(StreamError::ConsumerGone) => {
                tracing::debug!(session_id = %self.id, "Consumer disconnected mid-stream")
            }
            Err(e) => tracing::warn!(session_id = %self.id, error = %e, "Stream terminated"),
        }

        result
    }

    async fn emit(&mut self, writer: &mut FrameWriter) -> Result<SessionSummary, StreamError> {
        writer.send(&Frame::start(self.id.clone())).await?;
        self.state = ProducerState::Started;

        self.timer.sleep(self.pacing.thinking_delay).await;

        for index in 0..self.fragments.len() {
            self.state = ProducerState::Emitting(index);
            self.timer.sleep(self.pacing.fragment_delay).await;
            writer.send(&Frame::chunk(self.fragments[index].as_str())).await?;
        }

        writer.send(&Frame::End).await?;
        self.state = ProducerState::Ended;

        Ok(SessionSummary {
            id: self.id.clone(),
            chunks: self.fragments.len(),
            frames: writer.frames_written(),
            bytes: writer.bytes_written(),
        })
    }
}
