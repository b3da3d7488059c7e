//! Compare a live-assembled session with what the engine persisted.

use council_protocol::{AnalysisSummary, Contribution, HistoryMessage, SessionPhase};
use thiserror::Error;

use crate::transition::SessionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoundTripMismatch {
    #[error("session {0} has not completed")]
    NotComplete(String),

    #[error("persisted history has no assistant message")]
    MissingAssistant,

    #[error("contribution count differs: live {live}, persisted {persisted}")]
    Count { live: usize, persisted: usize },

    #[error("contribution #{index} differs: live {live}, persisted {persisted}")]
    Contribution {
        index: usize,
        live: String,
        persisted: String,
    },

    #[error("synthesis differs")]
    Synthesis,
}

/// Check the last assistant message of `history` against the live session.
pub fn verify_history(
    live: &SessionState,
    history: &[HistoryMessage],
) -> Result<(), RoundTripMismatch> {
    ensure_complete(live)?;
    let (synthesis, contributions) = history
        .iter()
        .rev()
        .find_map(|m| match m {
            HistoryMessage::Assistant {
                content,
                contributions,
            } => Some((content, contributions)),
            HistoryMessage::User { .. } => None,
        })
        .ok_or(RoundTripMismatch::MissingAssistant)?;
    verify(live, contributions, synthesis)
}

/// Check an analysis summary against the live session.
pub fn verify_summary(
    live: &SessionState,
    summary: &AnalysisSummary,
) -> Result<(), RoundTripMismatch> {
    ensure_complete(live)?;
    verify(live, &summary.contributions, &summary.consensus)
}

fn verify(
    live: &SessionState,
    persisted: &[Contribution],
    synthesis: &str,
) -> Result<(), RoundTripMismatch> {
    // Persisted order is reconstructed from `order`, not storage order.
    let mut persisted: Vec<&Contribution> = persisted.iter().collect();
    persisted.sort_by_key(|c| c.order);

    if persisted.len() != live.contributions.len() {
        return Err(RoundTripMismatch::Count {
            live: live.contributions.len(),
            persisted: persisted.len(),
        });
    }
    for (index, (ours, theirs)) in live.contributions.iter().zip(persisted).enumerate() {
        // Timestamps are arrival times on our side; not comparable.
        let same = ours.participant_name == theirs.participant_name
            && ours.order == theirs.order
            && ours.content == theirs.content;
        if !same {
            return Err(RoundTripMismatch::Contribution {
                index,
                live: describe(ours),
                persisted: describe(theirs),
            });
        }
    }

    if live.synthesis.as_deref().unwrap_or_default() != synthesis {
        return Err(RoundTripMismatch::Synthesis);
    }
    Ok(())
}

fn ensure_complete(live: &SessionState) -> Result<(), RoundTripMismatch> {
    if live.phase != SessionPhase::Complete {
        return Err(RoundTripMismatch::NotComplete(live.id.clone()));
    }
    Ok(())
}

fn describe(c: &Contribution) -> String {
    format!("{}@{}", c.participant_name, c.order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_protocol::ParticipantInfo;

    fn contribution(name: &str, order: i64, content: &str, timestamp: u64) -> Contribution {
        Contribution {
            participant_id: name.to_lowercase(),
            participant_name: name.into(),
            content: content.into(),
            order,
            timestamp,
        }
    }

    fn live() -> SessionState {
        let mut state = SessionState::new(
            "s-1",
            "How to grow a SaaS?",
            &[ParticipantInfo::new("e1", "E1"), ParticipantInfo::new("e2", "E2")],
            0,
        );
        state.phase = SessionPhase::Complete;
        state.contributions = vec![
            contribution("E1", 0, "retention", 10),
            contribution("E2", 1, "pricing", 20),
        ];
        state.synthesis = Some("combined".into());
        state
    }

    fn history(contributions: Vec<Contribution>, synthesis: &str) -> Vec<HistoryMessage> {
        vec![
            HistoryMessage::User {
                content: "How to grow a SaaS?".into(),
            },
            HistoryMessage::Assistant {
                content: synthesis.into(),
                contributions,
            },
        ]
    }

    #[test]
    fn matching_history_passes_regardless_of_storage_order() {
        let persisted = vec![
            contribution("E2", 1, "pricing", 0),
            contribution("E1", 0, "retention", 0),
        ];
        assert_eq!(verify_history(&live(), &history(persisted, "combined")), Ok(()));
    }

    #[test]
    fn differing_content_is_reported() {
        let persisted = vec![
            contribution("E1", 0, "retention", 0),
            contribution("E2", 1, "something else", 0),
        ];
        assert!(matches!(
            verify_history(&live(), &history(persisted, "combined")),
            Err(RoundTripMismatch::Contribution { index: 1, .. })
        ));
    }

    #[test]
    fn synthesis_and_count_mismatches() {
        let persisted = vec![
            contribution("E1", 0, "retention", 0),
            contribution("E2", 1, "pricing", 0),
        ];
        assert_eq!(
            verify_history(&live(), &history(persisted.clone(), "other")),
            Err(RoundTripMismatch::Synthesis)
        );
        assert_eq!(
            verify_history(&live(), &history(persisted[..1].to_vec(), "combined")),
            Err(RoundTripMismatch::Count {
                live: 2,
                persisted: 1
            })
        );
    }

    #[test]
    fn incomplete_sessions_and_missing_assistant() {
        let mut state = live();
        state.phase = SessionPhase::Errored;
        assert!(matches!(
            verify_history(&state, &[]),
            Err(RoundTripMismatch::NotComplete(_))
        ));
        assert_eq!(
            verify_history(&live(), &[]),
            Err(RoundTripMismatch::MissingAssistant)
        );
    }

    #[test]
    fn summary_uses_consensus_as_synthesis() {
        let summary = AnalysisSummary {
            id: "s-1".into(),
            problem: "How to grow a SaaS?".into(),
            contributions: live().contributions,
            consensus: "combined".into(),
            citations: vec![],
        };
        assert_eq!(verify_summary(&live(), &summary), Ok(()));
    }
}
