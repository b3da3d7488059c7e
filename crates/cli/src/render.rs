//! Terminal rendering for sessions, summaries and history.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};
use console::style;
use council_client::SessionState;
use council_protocol::{
    ActivityEvent, ActivityKind, AnalysisSummary, Contribution, HistoryMessage, ParticipantState,
    ParticipantStatus,
};

pub fn activity_line(event: &ActivityEvent) -> String {
    let marker = match event.kind {
        ActivityKind::Info => style("·").dim(),
        ActivityKind::Success => style("✓").green(),
        ActivityKind::Error => style("✗").red(),
    };
    match &event.participant_name {
        Some(name) => format!("{marker} [{name}] {}", event.message),
        None => format!("{marker} {}", event.message),
    }
}

pub fn status_label(state: ParticipantState) -> String {
    let label = state.label();
    match state {
        ParticipantState::Completed => style(label).green().to_string(),
        ParticipantState::Failed => style(label).red().to_string(),
        ParticipantState::Researching | ParticipantState::Analyzing => {
            style(label).yellow().to_string()
        }
        ParticipantState::Waiting => style(label).dim().to_string(),
    }
}

pub fn participants_table(statuses: &[ParticipantStatus]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Participant", "Status", "Progress", "Insights", "Notes"]);
    for status in statuses {
        let insights = match (status.insight_count, status.recommendation_count) {
            (None, None) => String::new(),
            (i, r) => format!("{} / {}", i.unwrap_or(0), r.unwrap_or(0)),
        };
        table.add_row(vec![
            Cell::new(&status.name),
            Cell::new(status_label(status.status)),
            Cell::new(format!("{}%", status.progress_percent)),
            Cell::new(insights),
            Cell::new(status.error_message.as_deref().unwrap_or("")),
        ]);
    }
    table
}

fn contribution_block(contribution: &Contribution) -> String {
    format!(
        "{} {}\n{}",
        style(format!("#{}", contribution.order)).dim(),
        style(&contribution.participant_name).bold(),
        contribution.content
    )
}

fn contributions_text(contributions: &[Contribution], synthesis: &str, citations: &[String]) -> String {
    let mut out = String::new();
    for c in contributions {
        out.push_str(&contribution_block(c));
        out.push_str("\n\n");
    }
    if !synthesis.is_empty() {
        out.push_str(&format!("{}\n{synthesis}\n", style("Synthesis").bold().underlined()));
    }
    if !citations.is_empty() {
        out.push_str(&format!("\n{}\n", style("Sources").bold()));
        for citation in citations {
            out.push_str(&format!("  - {citation}\n"));
        }
    }
    out
}

/// Final report for a live session, including partial results on failure.
pub fn session_report(session: &SessionState) -> String {
    let mut out = format!(
        "{} {}\n\n",
        style("Session").bold(),
        style(&session.id).dim()
    );
    out.push_str(&participants_table(&session.statuses()).to_string());
    out.push_str("\n\n");
    out.push_str(&contributions_text(
        &session.contributions,
        session.synthesis.as_deref().unwrap_or_default(),
        &session.citations,
    ));
    if let Some(error) = &session.error {
        out.push_str(&format!("\n{} {error}\n", style("Failed:").red().bold()));
    }
    out
}

pub fn summary_report(summary: &AnalysisSummary) -> String {
    let mut contributions = summary.contributions.clone();
    contributions.sort_by_key(|c| c.order);
    format!(
        "{} {}\n\n{}",
        style("Problem:").bold(),
        summary.problem,
        contributions_text(&contributions, &summary.consensus, &summary.citations)
    )
}

pub fn history_report(history: &[HistoryMessage]) -> String {
    let mut out = String::new();
    for message in history {
        match message {
            HistoryMessage::User { content } => {
                out.push_str(&format!("{} {content}\n\n", style("You:").cyan().bold()));
            }
            HistoryMessage::Assistant {
                content,
                contributions,
            } => {
                let mut contributions = contributions.clone();
                contributions.sort_by_key(|c| c.order);
                out.push_str(&contributions_text(&contributions, content, &[]));
                out.push('\n');
            }
        }
    }
    out
}
