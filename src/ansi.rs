//! Structured data hidden in terminal output.
//!
//! A block is `ESC[K`, then one or more `<base64 chunk>ESC[<len>D`, then
//! `ESC[K`. Each cursor-backward undoes its chunk, so a terminal shows
//! nothing, while a byte scanner can pull the payload back out.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::DEFAULT_ANSI_WIDTH;
use crate::error::{Error, Result};
use crate::event::Event;

const CLEAR_LINE: &str = "\x1b[K";

/// Encode `payload` with the default chunk width.
pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    encode_with_width(payload, DEFAULT_ANSI_WIDTH)
}

/// Encode `payload` as a single block of `width`-character chunks.
pub fn encode_with_width<T: Serialize + ?Sized>(payload: &T, width: usize) -> Result<String> {
    let data = STANDARD.encode(serde_json::to_vec(payload)?);
    let width = width.max(1);

    let mut out = String::with_capacity(data.len() + data.len() / width * 6 + 8);
    out.push_str(CLEAR_LINE);
    // base64 output is ASCII, so byte chunks are char chunks.
    for chunk in data.as_bytes().chunks(width) {
        let chunk = std::str::from_utf8(chunk).map_err(|e| Error::Other(e.to_string()))?;
        out.push_str(chunk);
        out.push_str(&format!("\x1b[{}D", chunk.len()));
    }
    out.push_str(CLEAR_LINE);
    Ok(out)
}

/// Decode the first block found in `text`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    let raw = block_payloads(text)
        .into_iter()
        .next()
        .ok_or_else(|| Error::Other("no encoded block found".to_string()))?;
    decode_payload(&raw)
}

/// Decode every block in `text`, in order. Blocks that don't decode are
/// skipped.
pub fn decode_all(text: &str) -> Vec<Value> {
    block_payloads(text)
        .iter()
        .filter_map(|raw| decode_payload(raw).ok())
        .collect()
}

fn decode_payload<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let bytes = STANDARD
        .decode(raw)
        .map_err(|e| Error::Other(format!("bad block encoding: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Concatenated chunk text of each well-formed block.
fn block_payloads(text: &str) -> Vec<String> {
    blocks(text).into_iter().map(|(_, _, payload)| payload).collect()
}

/// `(start, end, payload)` of each well-formed block, in order.
fn blocks(text: &str) -> Vec<(usize, usize, String)> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(offset) = find(&bytes[pos..], CLEAR_LINE.as_bytes()) {
        let open = pos + offset;
        match parse_block(bytes, open + CLEAR_LINE.len()) {
            Some((payload, end)) => {
                found.push((open, end, payload));
                pos = end;
            }
            // Not a block start; it may still close one, so resume right after it.
            None => pos = open + CLEAR_LINE.len(),
        }
    }
    found
}

/// Parse chunks starting at `pos`. Returns the payload and the index just
/// past the closing `ESC[K`.
fn parse_block(bytes: &[u8], mut pos: usize) -> Option<(String, usize)> {
    let mut payload = String::new();
    loop {
        let start = pos;
        while pos < bytes.len() && is_b64(bytes[pos]) {
            pos += 1;
        }
        if pos == start {
            break;
        }
        let chunk = &bytes[start..pos];

        // ESC [ <digits> D
        if bytes.get(pos..pos + 2) != Some(&b"\x1b["[..]) {
            return None;
        }
        pos += 2;
        let digits = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits || bytes.get(pos) != Some(&b'D') {
            return None;
        }
        pos += 1;
        payload.push_str(std::str::from_utf8(chunk).ok()?);
    }

    if payload.is_empty() || bytes.get(pos..pos + CLEAR_LINE.len()) != Some(CLEAR_LINE.as_bytes())
    {
        return None;
    }
    Some((payload, pos + CLEAR_LINE.len()))
}

fn is_b64(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ---------------------------------------------------------------------------
// Event envelope
// ---------------------------------------------------------------------------

/// What a terminal-scraping consumer needs to rebuild an event.
#[derive(Debug, Clone, Serialize)]
pub struct AnsiEnvelope<'a> {
    pub event: String,
    pub uuid: uuid::Uuid,
    pub created: chrono::DateTime<chrono::Utc>,
    pub event_data: &'a Value,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<uuid::Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
}

impl<'a> AnsiEnvelope<'a> {
    pub fn new(event: &'a Event, job_id: Option<i64>) -> Self {
        Self {
            event: event.kind.to_string(),
            uuid: event.uuid,
            created: event.created,
            event_data: &event.event_data,
            pid: std::process::id(),
            parent_uuid: event.parent_uuid,
            job_id,
        }
    }
}

/// Render an event for a terminal: begin marker, visible text, end marker.
///
/// The same block is written at both ends so a line-oriented reader can
/// bound the event even if unrelated output lands in between.
pub fn render_event(event: &Event, job_id: Option<i64>, width: usize) -> Result<String> {
    let marker = encode_with_width(&AnsiEnvelope::new(event, job_id), width)?;
    let mut out = String::with_capacity(marker.len() * 2 + event.stdout.len() + 1);
    out.push_str(&marker);
    if !event.stdout.is_empty() {
        out.push_str(&event.stdout);
        if !event.stdout.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str(&marker);
    Ok(out)
}

/// What a terminal would show: encoded blocks removed, other escape
/// sequences stripped.
pub fn visible_text(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut pos = 0;
    for (start, end, _) in blocks(text) {
        plain.push_str(&text[pos..start]);
        pos = end;
    }
    plain.push_str(&text[pos..]);

    let mut out = String::with_capacity(plain.len());
    let mut chars = plain.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
