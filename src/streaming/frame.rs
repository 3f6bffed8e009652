//! Frame codec for the chat event stream.
//!
//! Each frame travels as `data: <json>\n\n`. The JSON object carries a
//! `type` discriminator plus `id` (start) or `content` (chunk).

use bytes::{Buf, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::json;

const DATA_PREFIX: &str = "data: ";
const TERMINATOR: &[u8] = b"\n\n";

/// One unit of the chat stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Opens a session.
    Start { id: String },
    /// One reply fragment, verbatim.
    Chunk { content: String },
    /// Closes a session.
    End,
}

impl Frame {
    pub fn start(id: impl Into<String>) -> Self {
        Frame::Start { id: id.into() }
    }

    pub fn chunk(content: impl Into<String>) -> Self {
        Frame::Chunk {
            content: content.into(),
        }
    }

    /// Tag used on the wire and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Start { .. } => "start",
            Frame::Chunk { .. } => "chunk",
            Frame::End => "end",
        }
    }

    /// Serialize as a complete `data: ...\n\n` block.
    pub fn encode(&self) -> Bytes {
        let data = match self {
            Frame::Start { id } => json!({ "type": "start", "id": id }),
            Frame::Chunk { content } => json!({ "type": "chunk", "content": content }),
            Frame::End => json!({ "type": "end" }),
        };
        // JSON escapes newlines, so the body can never contain the terminator.
        format!("{}{}\n\n", DATA_PREFIX, data).into()
    }
}

/// Incremental decoder that tolerates arbitrary split points.
///
/// Bytes are buffered until a `\n\n` terminator arrives, so a frame split
/// across reads (even inside a UTF-8 sequence) is reassembled rather than
/// dropped. Malformed blocks are logged, counted and skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Bytes of `buffer` already searched for a terminator.
    scanned: usize,
    malformed: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every frame completed by them.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(end) = self.find_terminator() {
            let block = self.buffer.split_to(end);
            self.buffer.advance(TERMINATOR.len());
            self.scanned = 0;
            self.decode_block(&block, &mut frames);
        }
        frames
    }

    /// Signal end of input. Returns the number of buffered bytes that never
    /// formed a complete frame.
    pub fn finish(&mut self) -> usize {
        let leftover = self.buffer.len();
        if leftover > 0 {
            tracing::warn!(bytes = leftover, "Stream ended inside a frame");
            self.malformed += 1;
            self.buffer.clear();
            self.scanned = 0;
        }
        leftover
    }

    /// Number of blocks that could not be decoded.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn find_terminator(&mut self) -> Option<usize> {
        // Back up one byte so a terminator split across pushes is still seen.
        let from = self.scanned.saturating_sub(1);
        let found = self.buffer[from..]
            .windows(TERMINATOR.len())
            .position(|w| w == TERMINATOR)
            .map(|pos| from + pos);
        if found.is_none() {
            self.scanned = self.buffer.len();
        }
        found
    }

    fn decode_block(&mut self, block: &[u8], frames: &mut Vec<Frame>) {
        let text = match std::str::from_utf8(block) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping frame with invalid UTF-8");
                self.malformed += 1;
                return;
            }
        };

        for line in text.lines() {
            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                // Comments, event names and blank lines carry no frame.
                continue;
            };
            match serde_json::from_str::<Frame>(payload) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    tracing::warn!(error = %e, payload, "Error parsing streaming data");
                    self.malformed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_start() {
        let frame = Frame::start("42");
        assert_eq!(
            frame.encode().as_ref(),
            b"data: {\"id\":\"42\",\"type\":\"start\"}\n\n"
        );
    }

    #[test]
    fn test_encode_end() {
        assert_eq!(Frame::End.encode().as_ref(), b"data: {\"type\":\"end\"}\n\n");
    }

    #[test]
    fn test_chunk_with_newline_stays_single_block() {
        let encoded = Frame::chunk("\n").encode();
        let body = &encoded[..encoded.len() - 2];
        assert!(!body.windows(2).any(|w| w == b"\n\n"));
        assert!(encoded.ends_with(b"\n\n"));
    }

    #[test]
    fn test_decode_whole_stream() {
        let mut bytes = Vec::new();
        for frame in [Frame::start("a"), Frame::chunk("Hi "), Frame::chunk("there"), Frame::End] {
            bytes.extend_from_slice(&frame.encode());
        }

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes);
        assert_eq!(
            frames,
            vec![Frame::start("a"), Frame::chunk("Hi "), Frame::chunk("there"), Frame::End]
        );
        assert_eq!(decoder.pending(), 0);
        assert_eq!(decoder.finish(), 0);
    }

    #[test]
    fn test_split_at_terminator() {
        let encoded = Frame::chunk("abc").encode();
        let (head, tail) = encoded.split_at(encoded.len() - 1);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec![Frame::chunk("abc")]);
    }

    #[test]
    fn test_split_inside_code_point() {
        let encoded = Frame::chunk("\u{1F604}").encode();
        let emoji_start = encoded
            .iter()
            .position(|b| *b == 0xF0)
            .expect("emoji is sent raw");

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&encoded[..emoji_start + 2]).is_empty());
        assert_eq!(
            decoder.push(&encoded[emoji_start + 2..]),
            vec![Frame::chunk("\u{1F604}")]
        );
        assert_eq!(decoder.malformed(), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&Frame::start("x").encode());
        bytes.extend_from_slice(&Frame::chunk("caf\u{e9}").encode());
        bytes.extend_from_slice(&Frame::End.encode());

        let mut decoder = FrameDecoder::new();
        let frames: Vec<Frame> = bytes.iter().flat_map(|b| decoder.push(&[*b])).collect();
        assert_eq!(frames, vec![Frame::start("x"), Frame::chunk("caf\u{e9}"), Frame::End]);
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = b"data: {not json}\n\n".to_vec();
        bytes.extend_from_slice(&Frame::End.encode());

        assert_eq!(decoder.push(&bytes), vec![Frame::End]);
        assert_eq!(decoder.malformed(), 1);
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"ping\"}\n\n").is_empty());
        assert_eq!(decoder.malformed(), 1);
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b": keep-alive\n\nevent: message\ndata: {\"type\":\"end\"}\n\n");
        assert_eq!(frames, vec![Frame::End]);
        assert_eq!(decoder.malformed(), 0);
    }

    #[test]
    fn test_finish_reports_truncated_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: {\"type\":\"chu");
        assert_eq!(decoder.finish(), 18);
        assert_eq!(decoder.malformed(), 1);
        assert_eq!(decoder.pending(), 0);
    }
}
