//! Per-participant progress tracking.
//!
//! `waiting → researching → analyzing → completed | failed`, forward only.
//! Progress is advisory: it is interpolated locally and only ever rises.

use council_protocol::{ParticipantInfo, ParticipantState, ParticipantStatus};

const PROGRESS_RESEARCHING: u8 = 10;
const PROGRESS_ANALYZING: u8 = 50;
const PROGRESS_TICK: u8 = 5;
const PROGRESS_ACTIVE_CEILING: u8 = 95;
const PROGRESS_DONE: u8 = 100;

/// A status transition that actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: ParticipantState,
    pub to: ParticipantState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantTracker {
    status: ParticipantStatus,
}

impl ParticipantTracker {
    pub fn seed(info: &ParticipantInfo) -> Self {
        Self {
            status: ParticipantStatus {
                participant_id: info.id.clone(),
                name: info.name.clone(),
                avatar_ref: info.avatar_ref.clone(),
                status: ParticipantState::Waiting,
                progress_percent: 0,
                insight_count: None,
                recommendation_count: None,
                error_message: None,
            },
        }
    }

    pub fn status(&self) -> &ParticipantStatus {
        &self.status
    }

    pub fn id(&self) -> &str {
        &self.status.participant_id
    }

    pub fn name(&self) -> &str {
        &self.status.name
    }

    pub fn state(&self) -> ParticipantState {
        self.status.status
    }

    /// `expert_thinking`: the first one starts research, later ones move to analysis.
    pub fn on_thinking(&mut self) -> Option<StatusChange> {
        match self.status.status {
            ParticipantState::Waiting => {
                let change = self.advance(ParticipantState::Researching)?;
                self.raise_progress(PROGRESS_RESEARCHING);
                Some(change)
            }
            ParticipantState::Researching => {
                let change = self.advance(ParticipantState::Analyzing)?;
                self.raise_progress(PROGRESS_ANALYZING);
                Some(change)
            }
            _ => None,
        }
    }

    pub fn on_contribution(
        &mut self,
        insight_count: Option<u32>,
        recommendation_count: Option<u32>,
    ) -> Option<StatusChange> {
        let change = self.advance(ParticipantState::Completed)?;
        self.status.insight_count = insight_count;
        self.status.recommendation_count = recommendation_count;
        self.raise_progress(PROGRESS_DONE);
        Some(change)
    }

    pub fn on_error(&mut self, message: impl Into<String>) -> Option<StatusChange> {
        let change = self.advance(ParticipantState::Failed)?;
        self.status.error_message = Some(message.into());
        Some(change)
    }

    /// Nudge progress of an active participant towards the ceiling.
    pub fn tick(&mut self) {
        if self.status.status.is_active() {
            let next = self
                .status
                .progress_percent
                .saturating_add(PROGRESS_TICK)
                .min(PROGRESS_ACTIVE_CEILING);
            self.raise_progress(next);
        }
    }

    fn advance(&mut self, to: ParticipantState) -> Option<StatusChange> {
        let from = self.status.status;
        if !from.can_advance_to(to) {
            return None;
        }
        self.status.status = to;
        Some(StatusChange { from, to })
    }

    fn raise_progress(&mut self, percent: u8) {
        self.status.progress_percent = self.status.progress_percent.max(percent.min(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ParticipantTracker {
        ParticipantTracker::seed(&ParticipantInfo::new("e1", "E1"))
    }

    #[test]
    fn thinking_walks_through_active_sub_phases() {
        let mut p = tracker();
        assert_eq!(p.state(), ParticipantState::Waiting);

        let change = p.on_thinking().unwrap();
        assert_eq!(change.from, ParticipantState::Waiting);
        assert_eq!(change.to, ParticipantState::Researching);

        assert_eq!(p.on_thinking().unwrap().to, ParticipantState::Analyzing);
        assert_eq!(p.on_thinking(), None);
        assert_eq!(p.state(), ParticipantState::Analyzing);
    }

    #[test]
    fn contribution_records_counts_and_is_terminal() {
        let mut p = tracker();
        p.on_thinking();
        assert!(p.on_contribution(Some(4), Some(2)).is_some());

        assert_eq!(p.status().insight_count, Some(4));
        assert_eq!(p.status().recommendation_count, Some(2));
        assert_eq!(p.status().progress_percent, 100);

        assert_eq!(p.on_error("late"), None);
        assert_eq!(p.on_thinking(), None);
        assert_eq!(p.state(), ParticipantState::Completed);
        assert_eq!(p.status().error_message, None);
    }

    #[test]
    fn failure_keeps_message_and_progress() {
        let mut p = tracker();
        p.on_thinking();
        p.tick();
        let before = p.status().progress_percent;

        let change = p.on_error("timeout").unwrap();
        assert_eq!(change.to, ParticipantState::Failed);
        assert_eq!(p.status().error_message.as_deref(), Some("timeout"));
        assert_eq!(p.status().progress_percent, before);
        assert_eq!(p.on_contribution(None, None), None);
    }

    #[test]
    fn waiting_participant_can_fail_directly() {
        let mut p = tracker();
        assert_eq!(
            p.on_error("unavailable").unwrap().from,
            ParticipantState::Waiting
        );
    }

    #[test]
    fn progress_never_decreases_and_caps_while_active() {
        let mut p = tracker();
        p.tick();
        assert_eq!(p.status().progress_percent, 0, "waiting does not move");

        p.on_thinking();
        let mut last = p.status().progress_percent;
        for _ in 0..40 {
            p.tick();
            let now = p.status().progress_percent;
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, PROGRESS_ACTIVE_CEILING);

        // Analyzing floor sits below what ticks already reached.
        p.on_thinking();
        assert_eq!(p.status().progress_percent, PROGRESS_ACTIVE_CEILING);
    }
}
