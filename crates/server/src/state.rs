//! Shared relay state: the upstream client and the active-stream registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::info;

use crate::config::RelayRoutes;

/// Process-wide stream id counter.
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub path: String,
    pub opened_at: Instant,
}

pub struct RelayState {
    pub client: reqwest::Client,
    pub routes: RelayRoutes,
    streams: DashMap<u64, ActiveStream>,
}

impl RelayState {
    pub fn new(routes: RelayRoutes, connect_timeout: Duration) -> reqwest::Result<Self> {
        // No total timeout: streams stay open as long as the engine produces.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            routes,
            streams: DashMap::new(),
        })
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Track a streaming response until the returned guard drops.
    pub fn open_stream(self: &Arc<Self>, path: &str) -> StreamGuard {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        self.streams.insert(
            id,
            ActiveStream {
                path: path.to_string(),
                opened_at: Instant::now(),
            },
        );
        info!(
            component = "relay",
            event = "relay.stream.opened",
            stream_id = id,
            path = %path,
            active_streams = self.streams.len(),
        );
        StreamGuard {
            state: self.clone(),
            id,
            bytes: 0,
            chunks: 0,
        }
    }
}

/// Lives inside the response body stream; dropped when the client
/// connection finishes or goes away.
pub struct StreamGuard {
    state: Arc<RelayState>,
    id: u64,
    bytes: u64,
    chunks: u64,
}

impl StreamGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn record(&mut self, len: usize) {
        self.bytes += len as u64;
        self.chunks += 1;
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let Some((_, stream)) = self.state.streams.remove(&self.id) else {
            return;
        };
        info!(
            component = "relay",
            event = "relay.stream.closed",
            stream_id = self.id,
            path = %stream.path,
            bytes = self.bytes,
            chunks = self.chunks,
            duration_ms = stream.opened_at.elapsed().as_millis() as u64,
            active_streams = self.state.streams.len(),
        );
    }
}
