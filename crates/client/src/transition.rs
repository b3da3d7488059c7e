//! Pure session state transition function
//!
//! Everything that changes a session lives here as a pure, synchronous
//! function: `transition(state, input, now) -> (state, effects)`.
//! No IO, no async, no locking. Scripted frame sequences can be fed
//! straight in without a connection.

use council_protocol::{
    ActivityKind, AnalysisEvent, Contribution, ContributionFrame, ErrorFrame, ParticipantInfo,
    ParticipantState, ParticipantStatus, SessionPhase,
};

use crate::participant::{ParticipantTracker, StatusChange};

/// Reason recorded for participants still unresolved when `complete` arrives.
pub const NO_CONTRIBUTION_REASON: &str = "no contribution received";

// ---------------------------------------------------------------------------
// SessionState: pure data snapshot of a session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub id: String,
    pub problem: String,
    pub phase: SessionPhase,
    /// Fixed at submission, in submission order.
    pub participants: Vec<ParticipantTracker>,
    /// Sorted by `order`.
    pub contributions: Vec<Contribution>,
    pub synthesis: Option<String>,
    pub citations: Vec<String>,
    /// Session-wide failure reason once `Errored`.
    pub error: Option<String>,
    pub created_at: u64,
}

impl SessionState {
    pub fn new(
        id: impl Into<String>,
        problem: impl Into<String>,
        participants: &[ParticipantInfo],
        created_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            problem: problem.into(),
            phase: SessionPhase::Idle,
            participants: participants.iter().map(ParticipantTracker::seed).collect(),
            contributions: Vec::new(),
            synthesis: None,
            citations: Vec::new(),
            error: None,
            created_at,
        }
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.id())
    }

    pub fn participant(&self, id: &str) -> Option<&ParticipantStatus> {
        self.participants
            .iter()
            .find(|p| p.id() == id)
            .map(|p| p.status())
    }

    pub fn participant_by_name(&self, name: &str) -> Option<&ParticipantStatus> {
        self.participants
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.status())
    }

    pub fn statuses(&self) -> Vec<ParticipantStatus> {
        self.participants.iter().map(|p| p.status().clone()).collect()
    }

    /// The participant currently researching or analyzing, if any.
    pub fn active_participant(&self) -> Option<&ParticipantStatus> {
        self.participants
            .iter()
            .map(|p| p.status())
            .find(|s| s.status.is_active())
    }

    /// Resolve a frame's participant reference, preferring the id.
    fn participant_index(&self, id: Option<&str>, name: Option<&str>) -> Option<usize> {
        if let Some(id) = id {
            if let Some(index) = self.participants.iter().position(|p| p.id() == id) {
                return Some(index);
            }
        }
        let name = name?;
        self.participants.iter().position(|p| p.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Input: one variant per thing that can happen to a session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The question was submitted and a connection is being opened.
    Connect,
    /// A decoded frame arrived.
    Frame(AnalysisEvent),
    /// Advisory progress interpolation.
    ProgressTick,
    /// The stream broke (read error or undecodable frame).
    StreamFailed { reason: String },
    /// The connection closed without a terminal frame.
    StreamEnded,
    /// The consumer closed the connection.
    Cancelled,
}

impl From<AnalysisEvent> for Input {
    fn from(event: AnalysisEvent) -> Self {
        Input::Frame(event)
    }
}

// ---------------------------------------------------------------------------
// Effects: describe IO to be executed by the caller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Log(LogEntry),
    /// The session reached a terminal phase; release its connection.
    CloseConnection,
    /// A frame that could not be applied. Not fatal, but must be reported.
    Anomaly(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: ActivityKind,
    pub message: String,
    pub participant_name: Option<String>,
}

impl LogEntry {
    fn session(kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            participant_name: None,
        }
    }

    fn participant(kind: ActivityKind, name: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            participant_name: Some(name.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// transition(): the pure core
// ---------------------------------------------------------------------------

/// Pure, synchronous state transition.
///
/// Given the current state and an input, returns the new state and the
/// effects (activity entries, connection release) the caller must execute.
pub fn transition(mut state: SessionState, input: Input, now: u64) -> (SessionState, Vec<Effect>) {
    let mut effects: Vec<Effect> = Vec::new();

    // Complete and Errored sessions are frozen.
    if state.phase.is_terminal() {
        return (state, effects);
    }

    match input {
        Input::Connect => {
            if state.phase == SessionPhase::Idle {
                enter_phase(&mut state, SessionPhase::Connecting, &mut effects);
            }
        }

        Input::Frame(event) => {
            if state.phase == SessionPhase::Idle {
                effects.push(Effect::Anomaly(format!(
                    "`{}` frame before the session connected",
                    event.name()
                )));
                return (state, effects);
            }
            if state.phase == SessionPhase::Connecting {
                enter_phase(&mut state, SessionPhase::Streaming, &mut effects);
            }
            apply_frame(&mut state, event, now, &mut effects);
        }

        Input::ProgressTick => {
            for participant in &mut state.participants {
                participant.tick();
            }
        }

        Input::StreamFailed { reason } => fail_session(&mut state, reason, &mut effects),

        Input::StreamEnded => fail_session(
            &mut state,
            "connection closed before the analysis completed".to_string(),
            &mut effects,
        ),

        Input::Cancelled => {
            if state.phase == SessionPhase::Idle {
                return (state, effects);
            }
            fail_session(&mut state, "cancelled".to_string(), &mut effects)
        }
    }

    (state, effects)
}

fn apply_frame(state: &mut SessionState, event: AnalysisEvent, now: u64, effects: &mut Vec<Effect>) {
    match event {
        AnalysisEvent::UserMessage(_) => {}

        AnalysisEvent::ExpertThinking(frame) => {
            let Some(index) = state.participant_index(
                frame.participant_id.as_deref(),
                Some(&frame.participant_name),
            ) else {
                effects.push(Effect::Anomaly(format!(
                    "thinking frame for unknown participant `{}`",
                    frame.participant_name
                )));
                return;
            };
            let tracker = &mut state.participants[index];
            if let Some(change) = tracker.on_thinking() {
                log_status_change(tracker, change, effects);
            }
        }

        AnalysisEvent::Contribution(frame) => apply_contribution(state, frame, now, effects),

        AnalysisEvent::Error(frame) => apply_error(state, frame, effects),

        AnalysisEvent::Synthesizing => {
            enter_phase(state, SessionPhase::Synthesizing, effects);
        }

        AnalysisEvent::Synthesis(frame) => {
            enter_phase(state, SessionPhase::Synthesizing, effects);
            state.synthesis = Some(frame.content);
            state.citations = frame.citations;
        }

        AnalysisEvent::Complete => {
            for tracker in &mut state.participants {
                if let Some(change) = tracker.on_error(NO_CONTRIBUTION_REASON) {
                    log_status_change(tracker, change, effects);
                }
            }
            enter_phase(state, SessionPhase::Complete, effects);
        }
    }
}

fn apply_contribution(
    state: &mut SessionState,
    frame: ContributionFrame,
    now: u64,
    effects: &mut Vec<Effect>,
) {
    let Some(index) = state.participant_index(
        frame.participant_id.as_deref(),
        Some(&frame.participant_name),
    ) else {
        effects.push(Effect::Anomaly(format!(
            "contribution from unknown participant `{}`",
            frame.participant_name
        )));
        return;
    };

    let tracker = &mut state.participants[index];
    if tracker.state() == ParticipantState::Failed {
        effects.push(Effect::Anomaly(format!(
            "contribution from `{}` after it failed",
            tracker.name()
        )));
        return;
    }
    if let Some(change) = tracker.on_contribution(frame.insight_count, frame.recommendation_count)
    {
        log_status_change(tracker, change, effects);
    }

    let contribution = Contribution {
        participant_id: tracker.id().to_string(),
        participant_name: tracker.name().to_string(),
        content: frame.content,
        order: frame.order,
        timestamp: frame.timestamp.unwrap_or(now),
    };

    // One entry per participant and per order; the newest frame wins.
    state.contributions.retain(|c| {
        c.participant_id != contribution.participant_id && c.order != contribution.order
    });
    state.contributions.push(contribution);
    state.contributions.sort_by_key(|c| c.order);
}

fn apply_error(state: &mut SessionState, frame: ErrorFrame, effects: &mut Vec<Effect>) {
    let index = state.participant_index(
        frame.participant_id.as_deref(),
        frame.participant_name.as_deref(),
    );
    let Some(index) = index else {
        // Not scoped to a known participant: the whole session failed.
        fail_session(state, frame.message, effects);
        return;
    };

    let tracker = &mut state.participants[index];
    match tracker.on_error(frame.message) {
        Some(change) => log_status_change(tracker, change, effects),
        None => effects.push(Effect::Anomaly(format!(
            "error for `{}` after it was already {}",
            tracker.name(),
            tracker.state().label()
        ))),
    }
}

/// Move forward to `next`. Never moves backwards.
fn enter_phase(state: &mut SessionState, next: SessionPhase, effects: &mut Vec<Effect>) {
    let (Some(current), Some(target)) = (state.phase.ordinal(), next.ordinal()) else {
        return;
    };
    if target <= current {
        return;
    }
    state.phase = next;

    let entry = match next {
        SessionPhase::Connecting => {
            LogEntry::session(ActivityKind::Info, "Connecting to the council")
        }
        SessionPhase::Streaming => {
            LogEntry::session(ActivityKind::Info, "Council is deliberating")
        }
        SessionPhase::Synthesizing => {
            LogEntry::session(ActivityKind::Info, "Synthesizing council perspectives")
        }
        SessionPhase::Complete => LogEntry::session(ActivityKind::Success, "Analysis complete"),
        SessionPhase::Idle | SessionPhase::Errored => return,
    };
    effects.push(Effect::Log(entry));

    if next == SessionPhase::Complete {
        effects.push(Effect::CloseConnection);
    }
}

/// Session-wide failure. Contributions and statuses are kept as they are.
fn fail_session(state: &mut SessionState, reason: String, effects: &mut Vec<Effect>) {
    state.phase = SessionPhase::Errored;
    state.synthesis = None;
    effects.push(Effect::Log(LogEntry::session(
        ActivityKind::Error,
        format!("Analysis failed: {reason}"),
    )));
    state.error = Some(reason);
    effects.push(Effect::CloseConnection);
}

fn log_status_change(tracker: &ParticipantTracker, change: StatusChange, effects: &mut Vec<Effect>) {
    let name = tracker.name();
    let entry = match change.to {
        ParticipantState::Researching => {
            LogEntry::participant(ActivityKind::Info, name, format!("{name} is researching"))
        }
        ParticipantState::Analyzing => {
            LogEntry::participant(ActivityKind::Info, name, format!("{name} is analyzing"))
        }
        ParticipantState::Completed => LogEntry::participant(
            ActivityKind::Success,
            name,
            format!("{name} shared a perspective"),
        ),
        ParticipantState::Failed => {
            let reason = tracker.status().error_message.as_deref().unwrap_or("unknown");
            LogEntry::participant(
                ActivityKind::Error,
                name,
                format!("{name} failed: {reason}"),
            )
        }
        ParticipantState::Waiting => return,
    };
    effects.push(Effect::Log(entry));
}
