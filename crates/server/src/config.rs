//! Command-line and environment configuration for the relay.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "council-relay", version)]
#[command(about = "Streaming-safe HTTP relay in front of the council analysis engine", long_about = None)]
pub struct RelayConfig {
    /// Address to listen on
    #[arg(long, env = "COUNCIL_RELAY_BIND", default_value = "127.0.0.1:4000")]
    pub bind: SocketAddr,

    /// Base URL of the analysis engine
    #[arg(long, env = "COUNCIL_UPSTREAM_URL", default_value = "http://127.0.0.1:8000")]
    pub upstream: String,

    /// Path prefix that is relayed upstream
    #[arg(long, env = "COUNCIL_RELAY_PREFIX", default_value = "/api")]
    pub prefix: String,

    /// Path fragment marking a streaming request (repeatable)
    #[arg(long = "stream-marker", default_value = "/stream")]
    pub stream_markers: Vec<String>,

    /// Remove the prefix before forwarding
    #[arg(long)]
    pub strip_prefix: bool,

    /// Upstream connect timeout. There is no total request timeout.
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Data directory (logs live under `<data-dir>/logs`)
    #[arg(long, env = "COUNCIL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log to stderr instead of the log file
    #[arg(long)]
    pub log_stderr: bool,
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn routes(&self) -> RelayRoutes {
        RelayRoutes::new(
            &self.upstream,
            &self.prefix,
            self.stream_markers.clone(),
            self.strip_prefix,
        )
    }
}

/// Where a relayed request goes and whether it streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRoutes {
    upstream: String,
    prefix: String,
    stream_markers: Vec<String>,
    strip_prefix: bool,
}

impl RelayRoutes {
    pub fn new(
        upstream: &str,
        prefix: &str,
        stream_markers: Vec<String>,
        strip_prefix: bool,
    ) -> Self {
        let prefix = prefix.trim_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("/{prefix}")
        };
        Self {
            upstream: upstream.trim_end_matches('/').to_string(),
            prefix,
            stream_markers: stream_markers
                .into_iter()
                .filter(|m| !m.is_empty())
                .collect(),
            strip_prefix,
        }
    }

    /// Normalized prefix: empty, or `/segment` without a trailing slash.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn is_streaming(&self, path: &str) -> bool {
        self.stream_markers.iter().any(|m| path.contains(m.as_str()))
    }

    /// Upstream URL for an incoming path (query included).
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        let forwarded = if self.strip_prefix {
            path_and_query
                .strip_prefix(self.prefix.as_str())
                .unwrap_or(path_and_query)
        } else {
            path_and_query
        };
        if forwarded.starts_with('/') {
            format!("{}{}", self.upstream, forwarded)
        } else {
            format!("{}/{}", self.upstream, forwarded)
        }
    }
}
