//! Council Protocol
//!
//! Shared types for the council analysis stream: the frames an analysis
//! engine emits, the session pieces a client reconstructs from them, and the
//! persisted summary/history forms served by the engine's API.

use uuid::Uuid;

pub mod event;
pub mod types;

pub use event::{
    AnalysisEvent, ContributionFrame, ErrorFrame, ExpertThinking, FrameError, SynthesisFrame,
    UserMessage,
};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
