//! Chat event stream: frame codec, producer, consumer.

mod consumer;
mod frame;
mod producer;
mod timer;
mod writer;

pub use consumer::{consume, ChatState, ConsumeError};
pub use frame::{Frame, FrameDecoder};
pub use producer::{ChatProducer, ChatSession, Pacing, ProducerState, SessionSummary};
pub use timer::{InstantTimer, Timer, TokioTimer};
pub use writer::{BodyChunk, FrameWriter};
