//! Peerchat wire format: the messages exchanged over a peer link.
//!
//! Every message is one JSON object on its own line (NDJSON). JSON escapes
//! embedded newlines, so `\n` always marks a frame boundary and a reader can
//! reassemble frames no matter how TCP segments the stream.
//!
//!   {"type":"announce_port","port":6000}
//!   {"type":"chat","content":"hello"}
//!   {"type":"disconnect"}
//!   {"type":"error","message":"Duplicate connection rejected"}

use serde::{Deserialize, Serialize};

/// Longest chat payload, counted in Unicode scalar values.
pub const MAX_CHAT_CHARS: usize = 100;

/// Largest encoded frame, newline excluded.
pub const MAX_FRAME_BYTES: usize = 4096;

/// Most live links a peer keeps at once, inbound and outbound combined.
pub const MAX_CONNECTIONS: usize = 3;

// ── Messages ──────────────────────────────────────────────────────────────────

/// A protocol message. Closed set: anything else on the wire is a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Sent once by the connecting side, right after the TCP connect.
    /// Carries the sender's *listening* port, not its ephemeral source port.
    AnnouncePort { port: u16 },

    /// A line of chat, at most [`MAX_CHAT_CHARS`] characters.
    Chat { content: String },

    /// The sender is closing this link.
    Disconnect,

    /// The sender refused or aborted the link.
    Error { message: String },
}

impl Message {
    pub fn chat(content: impl Into<String>) -> Self {
        Self::Chat {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AnnouncePort { .. } => "announce_port",
            Self::Chat { .. } => "chat",
            Self::Disconnect => "disconnect",
            Self::Error { .. } => "error",
        }
    }

    fn validate(&self) -> Result<(), FrameError> {
        if let Self::Chat { content } = self {
            let len = content.chars().count();
            if len > MAX_CHAT_CHARS {
                return Err(FrameError::ContentTooLong {
                    len,
                    max: MAX_CHAT_CHARS,
                });
            }
        }
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("chat content too long: {len} > {max} characters")]
    ContentTooLong { len: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encode one message as a newline-terminated frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, FrameError> {
    message.validate()?;
    let mut encoded =
        serde_json::to_vec(message).map_err(|e| FrameError::Encode(e.to_string()))?;
    if encoded.len() > MAX_FRAME_BYTES {
        return Err(FrameError::Oversized {
            size: encoded.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

/// Decode a single frame. A trailing `\n` or `\r\n` is accepted.
pub fn decode_frame(bytes: &[u8]) -> Result<Message, FrameError> {
    decode_line(strip_line_ending(bytes), MAX_FRAME_BYTES)
}

fn decode_line(line: &[u8], max_frame_bytes: usize) -> Result<Message, FrameError> {
    if line.len() > max_frame_bytes {
        return Err(FrameError::Oversized {
            size: line.len(),
            max: max_frame_bytes,
        });
    }
    let message: Message =
        serde_json::from_slice(line).map_err(|e| FrameError::Decode(e.to_string()))?;
    message.validate()?;
    Ok(message)
}

fn strip_line_ending(mut raw: &[u8]) -> &[u8] {
    if let Some(rest) = raw.strip_suffix(b"\n") {
        raw = rest;
    }
    if let Some(rest) = raw.strip_suffix(b"\r") {
        raw = rest;
    }
    raw
}

// ── Incremental decoding ──────────────────────────────────────────────────────

/// Reassembles frames from arbitrary read chunks.
///
/// Results come out in arrival order. A malformed frame yields one `Err`
/// and decoding carries on with the next line. An over-long line is
/// reported once and then skipped through its terminating newline.
#[derive(Debug)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    discarding: bool,
    max_frame_bytes: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            discarding: false,
            max_frame_bytes,
        }
    }

    /// Feed bytes read from the stream; returns every frame they complete.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Result<Message, FrameError>> {
        let mut frames = Vec::new();
        self.pending.extend_from_slice(chunk);

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let line = strip_line_ending(&raw);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            frames.push(decode_line(line, self.max_frame_bytes));
        }

        if self.pending.len() > self.max_frame_bytes {
            if !self.discarding {
                frames.push(Err(FrameError::Oversized {
                    size: self.pending.len(),
                    max: self.max_frame_bytes,
                }));
            }
            self.discarding = true;
            self.pending.clear();
        }

        frames
    }

    /// Bytes of an unfinished frame still waiting for their newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
