//! Frame writer with per-write timeout.
//!
//! Frames are handed to the HTTP body through a bounded channel; the body
//! side drops its receiver when the client goes away, which surfaces here
//! as `ConsumerGone`.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::frame::Frame;
use crate::error::StreamError;
use crate::metrics;

/// Item type carried to the response body.
pub type BodyChunk = Result<Bytes, Infallible>;

/// Writes encoded frames into the response body channel.
pub struct FrameWriter {
    tx: mpsc::Sender<BodyChunk>,
    write_timeout: Duration,
    bytes_written: u64,
    frames_written: u64,
}

impl FrameWriter {
    /// Create a writer and the receiver the body should stream from.
    pub fn channel(capacity: usize, write_timeout: Duration) -> (Self, mpsc::Receiver<BodyChunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                write_timeout,
                bytes_written: 0,
                frames_written: 0,
            },
            rx,
        )
    }

    /// Send one frame.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), StreamError> {
        let data = frame.encode();
        let len = data.len() as u64;

        match tokio::time::timeout(self.write_timeout, self.tx.send(Ok(data))).await {
            Err(_) => Err(StreamError::WriteTimeout),
            Ok(Err(_)) => Err(StreamError::ConsumerGone),
            Ok(Ok(())) => {
                self.bytes_written += len;
                self.frames_written += 1;
                metrics::record_frame_sent(frame.kind(), len);
                Ok(())
            }
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}
