//! Council client
//!
//! Consumes a council analysis stream and assembles it into a session:
//! participant statuses, ordered contributions, a synthesis and an
//! activity log. The pieces, bottom-up:
//!
//! - `sse` frames raw bytes
//! - `connection` owns one open stream and decodes its frames
//! - `transition` is the pure per-session reducer
//! - `consumer` wires a transport, a connection and the reducer together

pub mod activity;
pub mod api;
pub mod connection;
pub mod consumer;
pub mod participant;
pub mod round_trip;
pub mod sse;
pub mod transition;
pub mod transport;

use thiserror::Error;

pub use activity::ActivityLog;
pub use api::{ApiError, CouncilApi};
pub use consumer::{ConsumerConfig, StreamConsumer};
pub use round_trip::{verify_history, verify_summary, RoundTripMismatch};
pub use transition::{transition, Effect, Input, SessionState};
pub use transport::{StreamRequest, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("session {session_id} is still in flight")]
    SessionInFlight { session_id: String },

    #[error("could not open analysis stream: {0}")]
    Transport(#[from] TransportError),

    #[error("session {session_id} failed: {reason}")]
    MidStream { session_id: String, reason: String },

    #[error("no session has been submitted")]
    NoSession,
}
