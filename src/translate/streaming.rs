//! Incremental re-framing of Gemini SSE bytes into OpenAI chat completion chunks.
//!
//! The [`StreamReframer`] is fed raw bytes from the backend in arrival order.
//! It buffers until a blank-line delimiter closes a frame, translates each
//! complete frame into at most one [`ChatCompletionChunk`], and on
//! [`StreamReframer::finish`] emits the terminal chunk and the `[DONE]` sentinel.

use super::gemini_types::GenerateContentResponse;
use super::openai_types::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
use super::response::{completion_id, extract_text, unix_now, ContentPolicy};

/// Sentinel that closes an OpenAI event stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// One outgoing event, rendered as the `data:` payload of an SSE record.
#[derive(Debug, Clone)]
pub enum ReframedEvent {
    Chunk(ChatCompletionChunk),
    Done,
}

impl ReframedEvent {
    pub fn to_sse_data(&self) -> String {
        match self {
            ReframedEvent::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_default(),
            ReframedEvent::Done => DONE_SENTINEL.to_string(),
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            ReframedEvent::Chunk(chunk) => chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref()),
            ReframedEvent::Done => None,
        }
    }

    pub fn finish_reason(&self) -> Option<&str> {
        match self {
            ReframedEvent::Chunk(chunk) => chunk
                .choices
                .first()
                .and_then(|c| c.finish_reason.as_deref()),
            ReframedEvent::Done => None,
        }
    }
}

/// Per-request state machine over the backend byte stream.
///
/// Usage:
///   let mut reframer = StreamReframer::new("gemini-1.5-flash", ContentPolicy::default());
///   while let Some(bytes) = backend.next().await {
///       for event in reframer.push(&bytes) { /* send as SSE */ }
///   }
///   for event in reframer.finish() { /* send as SSE */ }
#[derive(Debug)]
pub struct StreamReframer {
    id: String,
    created: i64,
    model: String,
    policy: ContentPolicy,
    buffer: Vec<u8>,
    has_emitted_content: bool,
    finished: bool,
    frames_seen: u64,
    dropped_frames: u64,
}

impl StreamReframer {
    pub fn new(model: &str, policy: ContentPolicy) -> Self {
        Self {
            id: completion_id(),
            created: unix_now(),
            model: model.to_string(),
            policy,
            buffer: Vec::new(),
            has_emitted_content: false,
            finished: false,
            frames_seen: 0,
            dropped_frames: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Complete frames consumed so far, parseable or not.
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Frames discarded because their payload was not valid JSON.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Append one network read and return the chunks for every frame it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ReframedEvent> {
        if self.finished {
            return Vec::new();
        }

        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some((end, delimiter_len)) = find_delimiter(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + delimiter_len).take(end).collect();
            self.frames_seen += 1;

            if let Some(event) = self.translate_frame(&frame) {
                events.push(event);
            }
        }

        events
    }

    /// Call once the backend stream has ended cleanly. Bytes still buffered
    /// without a closing delimiter are discarded.
    pub fn finish(&mut self) -> Vec<ReframedEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        self.buffer.clear();

        let mut events = Vec::new();

        if !self.has_emitted_content {
            if let Some(ref placeholder) = self.policy.empty_content_fallback {
                events.push(ReframedEvent::Chunk(
                    self.make_chunk(Some(placeholder.clone()), None),
                ));
            }
        }

        events.push(ReframedEvent::Chunk(
            self.make_chunk(None, Some("stop".to_string())),
        ));
        events.push(ReframedEvent::Done);

        events
    }

    fn translate_frame(&mut self, frame: &[u8]) -> Option<ReframedEvent> {
        let raw = String::from_utf8_lossy(frame);
        let payload = strip_data_prefix(raw.trim());

        let parsed: GenerateContentResponse = match serde_json::from_str(payload) {
            Ok(p) => p,
            Err(e) => {
                self.dropped_frames += 1;
                tracing::debug!(error = %e, "Dropping unparseable stream frame");
                return None;
            }
        };

        let text = extract_text(&parsed);
        if text.is_empty() {
            return None;
        }

        self.has_emitted_content = true;
        Some(ReframedEvent::Chunk(
            self.make_chunk(Some(text.to_string()), None),
        ))
    }

    fn make_chunk(&self, content: Option<String>, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta { content },
                finish_reason,
            }],
        }
    }
}

/// Earliest blank-line delimiter in `buf` as `(offset, length)`.
/// Accepts `\n\n` and the `\r\n\r\n` form the Gemini SSE endpoint sends.
fn find_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = find_subslice(buf, b"\n\n").map(|i| (i, 2));
    let crlf = find_subslice(buf, b"\r\n\r\n").map(|i| (i, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn strip_data_prefix(frame: &str) -> &str {
    frame
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(frame)
}
