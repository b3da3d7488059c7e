//! Server-sent-events framing over a raw analysis byte stream.
//!
//! Line splitting, comments, `id`/`retry` fields and UTF-8 sequences split
//! across network chunks are handled by `eventsource-stream`. This module
//! only narrows its events to what the decoder needs.
//!
//! ```text
//! event: contribution
//! data: {"participantName":"E1","content":"...","order":0}
//!
//! ```

use std::pin::Pin;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::transport::{ByteStream, TransportError};

/// One dispatched frame: event name plus joined `data` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl From<Event> for SseFrame {
    fn from(event: Event) -> Self {
        Self {
            event: event.event,
            data: event.data,
        }
    }
}

#[derive(Debug, Error)]
pub enum SseError {
    #[error("stream read failed: {0}")]
    Transport(TransportError),

    #[error("invalid event stream: {0}")]
    Framing(String),
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, SseError>> + Send>>;

/// Frame `bytes` as server-sent events, in arrival order.
///
/// Frames without any `data:` line are not dispatched, and an unterminated
/// trailing frame is dropped at end of stream.
pub fn frames(bytes: ByteStream) -> FrameStream {
    Box::pin(bytes.eventsource().map(|item| match item {
        Ok(event) => Ok(SseFrame::from(event)),
        Err(EventStreamError::Transport(e)) => Err(SseError::Transport(e)),
        Err(e) => Err(SseError::Framing(e.to_string())),
    }))
}
