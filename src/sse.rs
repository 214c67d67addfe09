//! Decoding of the upstream's server-sent-event stream.
//!
//! [`events`] turns raw body chunks into parsed `data:` events, [`deltas`]
//! turns those events into the text pieces that get forwarded to the client.
//! Both are lazy and end at the `[DONE]` sentinel or when the upstream closes.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Data(Value),
    Done,
}

// Splits incoming bytes into complete lines. Works on bytes so a UTF-8
// sequence cut between two reads stays in the buffer until its line is done.
#[derive(Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    // everything before this offset is known to hold no newline
    scanned: usize,
}

impl LineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            lines.push(String::from_utf8_lossy(&self.buffer[start..end]).into_owned());
            start = end + 1;
            self.scanned = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        lines
    }

    // Whatever is left once the upstream closed without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

// `None` for comments, other fields, empty data and malformed JSON
pub fn parse_line(line: &str) -> Option<SseEvent> {
    let data = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if data.is_empty() {
        return None;
    }
    if data == DONE_SENTINEL {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str(data) {
        Ok(value) => Some(SseEvent::Data(value)),
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed stream event");
            None
        }
    }
}

pub fn events<S, E>(bytes: S) -> impl Stream<Item = Result<SseEvent, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    async_stream::stream! {
        let mut decoder = LineDecoder::default();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for line in decoder.push(&chunk) {
                match parse_line(&line) {
                    Some(SseEvent::Done) => {
                        yield Ok(SseEvent::Done);
                        return;
                    }
                    Some(event) => yield Ok(event),
                    None => {}
                }
            }
        }

        if let Some(event) = decoder.finish().as_deref().and_then(parse_line) {
            yield Ok(event);
        }
    }
}

// Per-stream state: whether anything has been forwarded yet
#[derive(Default)]
pub struct DeltaExtractor {
    sent_any: bool,
}

impl DeltaExtractor {
    // An explicit `delta` always wins. A full-text field (`text`, then
    // `output_text`) is only forwarded while nothing else has been, since
    // the upstream repeats the whole answer in its final events.
    pub fn extract(&mut self, payload: &Value) -> Option<String> {
        if let Some(delta) = payload.get("delta").and_then(Value::as_str) {
            if delta.is_empty() {
                return None;
            }
            self.sent_any = true;
            return Some(delta.to_string());
        }

        let full = payload
            .get("text")
            .and_then(Value::as_str)
            .or_else(|| payload.get("output_text").and_then(Value::as_str))?;
        if self.sent_any || full.is_empty() {
            return None;
        }
        self.sent_any = true;
        Some(full.to_string())
    }
}

// Text pieces in arrival order; a transport error is yielded once and ends it
pub fn deltas<S, E>(bytes: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    async_stream::stream! {
        let mut extractor = DeltaExtractor::default();
        let events = events(bytes);
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                Ok(SseEvent::Data(payload)) => {
                    if let Some(text) = extractor.extract(&payload) {
                        yield Ok(text);
                    }
                }
                Ok(SseEvent::Done) => return,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
}
