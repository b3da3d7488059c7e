//! Single-owner handle to one open analysis stream.
//!
//! The handle owns a pump task that reads the byte stream, frames it and
//! decodes each frame, forwarding results over a bounded channel. A slow
//! consumer therefore slows down reads from the socket. `close()` aborts the
//! pump; dropping the handle closes it too.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use council_protocol::AnalysisEvent;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sse::{self, SseFrame};
use crate::transport::ByteStream;

const FRAME_CHANNEL_CAPACITY: usize = 32;

/// What the pump hands to the consumer.
#[derive(Debug)]
pub enum StreamItem {
    Frame(AnalysisEvent),
    /// Read error or undecodable frame. Nothing follows.
    Failed(String),
    /// The engine closed the stream.
    Ended,
}

pub struct ConnectionHandle {
    session_id: String,
    rx: mpsc::Receiver<StreamItem>,
    task: Option<JoinHandle<()>>,
    open_connections: Arc<AtomicUsize>,
}

impl ConnectionHandle {
    /// Take ownership of `bytes` and start pumping frames from it.
    pub fn spawn(
        session_id: impl Into<String>,
        bytes: ByteStream,
        open_connections: Arc<AtomicUsize>,
    ) -> Self {
        let session_id = session_id.into();
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let task = tokio::spawn(pump(session_id.clone(), bytes, tx));
        let open = open_connections.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            component = "connection",
            event = "connection.opened",
            session_id = %session_id,
            open_connections = open,
        );
        Self {
            session_id,
            rx,
            task: Some(task),
            open_connections,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_open(&self) -> bool {
        self.task.is_some()
    }

    /// Wait for the next item. `None` once closed or drained.
    pub async fn next(&mut self) -> Option<StreamItem> {
        if self.task.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    /// Close the connection now. Idempotent.
    pub fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        self.rx.close();
        let open = self.open_connections.fetch_sub(1, Ordering::SeqCst) - 1;
        info!(
            component = "connection",
            event = "connection.closed",
            session_id = %self.session_id,
            open_connections = open,
        );
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump(session_id: String, bytes: ByteStream, tx: mpsc::Sender<StreamItem>) {
    let mut frames = sse::frames(bytes);

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => {
                if !forward(&session_id, &tx, frame).await {
                    return;
                }
            }
            Err(e) => {
                warn!(
                    component = "connection",
                    event = "connection.read_failed",
                    session_id = %session_id,
                    error = %e,
                    "Analysis stream read failed"
                );
                let _ = tx.send(StreamItem::Failed(e.to_string())).await;
                return;
            }
        }
    }

    debug!(
        component = "connection",
        event = "connection.eof",
        session_id = %session_id,
    );
    let _ = tx.send(StreamItem::Ended).await;
}

/// Decode and forward one frame. Returns false when the pump should stop.
async fn forward(session_id: &str, tx: &mpsc::Sender<StreamItem>, frame: SseFrame) -> bool {
    match AnalysisEvent::from_frame(&frame.event, &frame.data) {
        Ok(event) => tx.send(StreamItem::Frame(event)).await.is_ok(),
        Err(e) if e.is_skippable() => {
            debug!(
                component = "connection",
                event = "connection.frame_skipped",
                session_id = %session_id,
                frame = %frame.event,
                reason = %e,
            );
            true
        }
        Err(e) => {
            warn!(
                component = "connection",
                event = "connection.decode_failed",
                session_id = %session_id,
                error = %e,
                "Undecodable analysis frame"
            );
            let _ = tx.send(StreamItem::Failed(e.to_string())).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::transport::TransportError;

    fn stream(chunks: Vec<Result<&'static str, TransportError>>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(|text| Bytes::from_static(text.as_bytes())))
                .collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn frames_then_end() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut conn = ConnectionHandle::spawn(
            "s",
            stream(vec![
                Ok("event: heartbeat\ndata: {}\n\n"),
                Ok("event: synthesizing\ndata: {}\n\nevent: comp"),
                Ok("lete\ndata: {}\n\n"),
            ]),
            counter.clone(),
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(matches!(
            conn.next().await,
            Some(StreamItem::Frame(AnalysisEvent::Synthesizing))
        ));
        assert!(matches!(
            conn.next().await,
            Some(StreamItem::Frame(AnalysisEvent::Complete))
        ));
        assert!(matches!(conn.next().await, Some(StreamItem::Ended)));

        conn.close();
        assert!(!conn.is_open());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(conn.next().await.is_none());
    }

    #[tokio::test]
    async fn read_error_is_reported_once() {
        let mut conn = ConnectionHandle::spawn(
            "s",
            stream(vec![
                Ok("event: synthesizing\ndata: {}\n\n"),
                Err(TransportError::Connection("reset by peer".into())),
                Ok("event: complete\ndata: {}\n\n"),
            ]),
            Arc::new(AtomicUsize::new(0)),
        );
        assert!(matches!(
            conn.next().await,
            Some(StreamItem::Frame(AnalysisEvent::Synthesizing))
        ));
        match conn.next().await {
            Some(StreamItem::Failed(reason)) => assert!(reason.contains("reset by peer")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(conn.next().await.is_none());
    }

    #[tokio::test]
    async fn malformed_payload_fails_the_stream() {
        let mut conn = ConnectionHandle::spawn(
            "s",
            stream(vec![Ok("event: contribution\ndata: {oops}\n\n")]),
            Arc::new(AtomicUsize::new(0)),
        );
        assert!(matches!(conn.next().await, Some(StreamItem::Failed(_))));
    }

    #[tokio::test]
    async fn untyped_keep_alives_are_skipped() {
        let mut conn = ConnectionHandle::spawn(
            "s",
            stream(vec![Ok("data: ping\n\n"), Ok("event: complete\ndata: {}\n\n")]),
            Arc::new(AtomicUsize::new(0)),
        );
        assert!(matches!(
            conn.next().await,
            Some(StreamItem::Frame(AnalysisEvent::Complete))
        ));
        assert!(matches!(conn.next().await, Some(StreamItem::Ended)));
    }

    #[tokio::test]
    async fn drop_releases_the_connection() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, TransportError>>();
        let conn = ConnectionHandle::spawn("s", Box::pin(rx), counter.clone());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(conn);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
