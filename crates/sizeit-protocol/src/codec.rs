//! Server-sent-events codec for size-it events.
//!
//! An encoded event is a text block:
//!
//! ```text
//! event: results
//! data: <first payload line>
//! data: <next payload line>
//!
//! ```
//!
//! Multi-line payloads are split over several `data:` lines and joined back
//! with `\n` on decode, so fragments keep their line structure.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::event::{Event, EventKind};

/// Maximum payload size (1 MiB).
pub const MAX_EVENT_SIZE: usize = 1024 * 1024;

const EVENT_FIELD: &str = "event:";
const DATA_FIELD: &str = "data:";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload exceeds maximum size.
    #[error("Event size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    EventTooLarge(usize),

    /// Event name is not one of the known kinds.
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),

    /// Block is not valid UTF-8.
    #[error("Event block is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    /// Invalid event block.
    #[error("Invalid event: {0}")]
    Invalid(String),
}

/// Encode an event as a server-sent-events block.
///
/// # Errors
///
/// Returns an error if the payload is too large.
pub fn encode(event: &Event) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(event.payload.len() + 32);
    encode_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event into an existing buffer.
///
/// # Errors
///
/// Returns an error if the payload is too large.
pub fn encode_into(event: &Event, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    if event.payload.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(event.payload.len()));
    }

    buf.reserve(event.payload.len() + 32);
    buf.put_slice(EVENT_FIELD.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(event.kind.as_str().as_bytes());
    buf.put_u8(b'\n');

    for line in event.payload.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        buf.put_slice(DATA_FIELD.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(line);
        buf.put_u8(b'\n');
    }

    buf.put_u8(b'\n');
    Ok(())
}

/// Try to decode one event from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(event))` if a complete block was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
/// Comment lines (starting with `:`) are ignored, and blocks made only of
/// comments, such as keep-alives, are consumed without yielding an event.
///
/// # Errors
///
/// Returns an error if the block is invalid or names an unknown kind.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Event>, ProtocolError> {
    loop {
        let Some(end) = buf.windows(2).position(|w| w == b"\n\n") else {
            if buf.len() > MAX_EVENT_SIZE * 2 {
                return Err(ProtocolError::EventTooLarge(buf.len()));
            }
            return Ok(None);
        };

        let block = buf.split_to(end + 2);
        if let Some(event) = decode_block(&block[..end])? {
            return Ok(Some(event));
        }
    }
}

/// Parse one block without its terminating blank line.
///
/// Returns `Ok(None)` for a block without any field.
fn decode_block(block: &[u8]) -> Result<Option<Event>, ProtocolError> {
    let text = std::str::from_utf8(block)?;

    let mut kind = None;
    let mut data: Option<String> = None;

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix(EVENT_FIELD) {
            kind = Some(value.trim_start().parse::<EventKind>()?);
        } else if let Some(value) = line.strip_prefix(DATA_FIELD) {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(acc) => {
                    acc.push('\n');
                    acc.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        } else {
            return Err(ProtocolError::Invalid(format!("unexpected line: {line}")));
        }
    }

    match (kind, data) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(ProtocolError::Invalid("missing event field".into())),
        (Some(kind), data) => Ok(Some(Event::new(kind, data.unwrap_or_default()))),
    }
}
