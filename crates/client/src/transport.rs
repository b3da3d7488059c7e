//! How a stream consumer opens its connection to the analysis engine.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

/// Raw response body of an analysis stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("connection failed: {0}")]
    Connection(String),
}

/// What to open: one session's stream for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub session_id: String,
    pub message: String,
}

/// Opens analysis streams. Implemented over HTTP by `CouncilApi`; tests
/// script their own.
pub trait Transport: Send + Sync {
    fn open(
        &self,
        request: &StreamRequest,
    ) -> impl Future<Output = Result<ByteStream, TransportError>> + Send;
}
