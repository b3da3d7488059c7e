//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Session phase
///
/// `Idle < Connecting < Streaming < Synthesizing < Complete` form the forward
/// path; `Errored` is a separate terminal state with no ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Streaming,
    Synthesizing,
    Complete,
    Errored,
}

impl SessionPhase {
    /// Position on the forward path. `None` for `Errored`.
    pub fn ordinal(self) -> Option<u8> {
        match self {
            SessionPhase::Idle => Some(0),
            SessionPhase::Connecting => Some(1),
            SessionPhase::Streaming => Some(2),
            SessionPhase::Synthesizing => Some(3),
            SessionPhase::Complete => Some(4),
            SessionPhase::Errored => None,
        }
    }

    /// A connection is open (or being opened) for the session.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionPhase::Connecting | SessionPhase::Streaming | SessionPhase::Synthesizing
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Complete | SessionPhase::Errored)
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Synthesizing => "synthesizing",
            SessionPhase::Complete => "complete",
            SessionPhase::Errored => "errored",
        }
    }
}

/// What a participant is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    Waiting,
    Researching,
    Analyzing,
    Completed,
    Failed,
}

impl ParticipantState {
    fn rank(self) -> u8 {
        match self {
            ParticipantState::Waiting => 0,
            ParticipantState::Researching => 1,
            ParticipantState::Analyzing => 2,
            ParticipantState::Completed | ParticipantState::Failed => 3,
        }
    }

    /// Researching or analyzing.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ParticipantState::Researching | ParticipantState::Analyzing
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ParticipantState::Completed | ParticipantState::Failed)
    }

    /// Whether moving from `self` to `next` goes forward.
    pub fn can_advance_to(self, next: ParticipantState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn label(self) -> &'static str {
        match self {
            ParticipantState::Waiting => "waiting",
            ParticipantState::Researching => "researching",
            ParticipantState::Analyzing => "analyzing",
            ParticipantState::Completed => "completed",
            ParticipantState::Failed => "failed",
        }
    }
}

/// A council member taking part in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_ref: String,
}

impl ParticipantInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar_ref: String::new(),
        }
    }
}

/// Per-participant progress within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStatus {
    pub participant_id: String,
    pub name: String,
    pub avatar_ref: String,
    pub status: ParticipantState,
    /// Advisory only, never decreases.
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A participant's finished output for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub participant_id: String,
    pub participant_name: String,
    pub content: String,
    pub order: i64,
    #[serde(default)]
    pub timestamp: u64,
}

/// Activity feed classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Info,
    Success,
    Error,
}

/// One entry of the activity feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_name: Option<String>,
    pub timestamp: u64,
}

/// Persisted analysis served by `GET /council/analyses/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub id: String,
    pub problem: String,
    pub contributions: Vec<Contribution>,
    pub consensus: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Persisted chat message served by `GET /council/chat/{id}/messages`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum HistoryMessage {
    User {
        content: String,
    },
    Assistant {
        /// Synthesis text
        content: String,
        #[serde(default)]
        contributions: Vec<Contribution>,
    },
}
