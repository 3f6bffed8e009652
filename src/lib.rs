//! Scripted chat streaming server and image-template service.
//!
//! The chat endpoint streams `data: <json>\n\n` frames (start, chunks, end)
//! chosen from a keyword response table; the consumer side reassembles them
//! across arbitrary read boundaries. Image template, upload and generation
//! flows run over pluggable collaborator traits.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod gallery;
pub mod metrics;
pub mod responses;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod streaming;

pub use config::Config;
pub use error::{AppError, Result};
