//! Prometheus metrics for chat sessions and the HTTP surface.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::StreamError;

/// Outcome labels for finished sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// All frames written, end frame included.
    Completed,
    /// Consumer went away mid-stream.
    ConsumerGone,
    /// Write or session deadline exceeded.
    Timeout,
    /// Server shutdown interrupted the session.
    Cancelled,
    /// Anything else.
    Other,
}

impl SessionOutcome {
    /// Convert to static string for metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::ConsumerGone => "consumer_gone",
            SessionOutcome::Timeout => "timeout",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::Other => "other",
        }
    }

    /// Classify a session result.
    pub fn from_result<T>(result: &Result<T, StreamError>) -> Self {
        match result {
            Ok(_) => SessionOutcome::Completed,
            Err(StreamError::ConsumerGone) => SessionOutcome::ConsumerGone,
            Err(StreamError::WriteTimeout) | Err(StreamError::SessionTimeout(_)) => {
                SessionOutcome::Timeout
            }
            Err(StreamError::Cancelled) => SessionOutcome::Cancelled,
            Err(_) => SessionOutcome::Other,
        }
    }
}

/// Initialize metrics descriptions.
pub fn init_metrics() {
    describe_gauge!("chat_active_sessions", "Number of chat streams in flight");
    describe_counter!("chat_sessions_total", "Chat streams opened");
    describe_counter!(
        "chat_sessions_finished_total",
        "Chat streams finished, labelled by outcome"
    );
    describe_counter!("chat_frames_sent_total", "Frames written, labelled by kind");
    describe_counter!("chat_bytes_sent_total", "Encoded frame bytes written");
    describe_histogram!(
        "chat_session_duration_seconds",
        "Wall time from start frame to close"
    );
    describe_counter!(
        "api_errors_total",
        "JSON error responses, labelled by status code"
    );
}

/// Start the Prometheus metrics HTTP server.
pub fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // Sessions run 0.5s-5s at default pacing.
    let duration_buckets: [f64; 10] = [0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("chat_session_duration_seconds".to_string()),
            &duration_buckets,
        )?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

/// Update active session gauge.
pub fn set_active_sessions(count: u64) {
    gauge!("chat_active_sessions").set(count as f64);
}

/// Record a session entering `Started`.
pub fn record_session_start() {
    counter!("chat_sessions_total").increment(1);
}

/// Record a session reaching `Closed`.
pub fn record_session_end<T>(result: &Result<T, StreamError>, duration: Duration) {
    let outcome = SessionOutcome::from_result(result);
    counter!("chat_sessions_finished_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("chat_session_duration_seconds").record(duration.as_secs_f64());
}

/// Record one frame handed to the transport.
pub fn record_frame_sent(kind: &'static str, bytes: u64) {
    counter!("chat_frames_sent_total", "kind" => kind).increment(1);
    counter!("chat_bytes_sent_total").increment(bytes);
}

/// Record an error envelope returned to a caller.
pub fn record_api_error(status: u16) {
    counter!("api_errors_total", "status" => status.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        let ok: Result<(), StreamError> = Ok(());
        assert_eq!(SessionOutcome::from_result(&ok), SessionOutcome::Completed);

        let gone: Result<(), StreamError> = Err(StreamError::ConsumerGone);
        assert_eq!(SessionOutcome::from_result(&gone), SessionOutcome::ConsumerGone);

        let slow: Result<(), StreamError> = Err(StreamError::SessionTimeout(60));
        assert_eq!(SessionOutcome::from_result(&slow).as_str(), "timeout");

        let stop: Result<(), StreamError> = Err(StreamError::Cancelled);
        assert_eq!(SessionOutcome::from_result(&stop), SessionOutcome::Cancelled);
    }
}
