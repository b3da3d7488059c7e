//! Council CLI
//!
//! Ask the expert council a question and watch the analysis arrive live.

mod render;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use council_client::{
    verify_history, ConsumerConfig, ConsumerError, CouncilApi, StreamConsumer,
};
use council_protocol::{new_id, ParticipantInfo, SessionPhase};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "council", version)]
#[command(about = "Council CLI - ask the expert council from the terminal", long_about = None)]
struct Cli {
    /// Base URL of the council API (usually the relay)
    #[arg(
        long,
        global = true,
        env = "COUNCIL_BASE_URL",
        default_value = "http://127.0.0.1:4000/api"
    )]
    base: String,

    /// Print JSON instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and stream the council's analysis
    Ask {
        /// The problem to analyze
        question: String,

        /// Participant as `id=Name` or `Name` (repeatable, in panel order)
        #[arg(long = "expert", required = true)]
        experts: Vec<String>,

        /// Session id (generated when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Compare the live result with persisted history afterwards
        #[arg(long)]
        verify: bool,

        /// Progress tick interval in milliseconds (0 disables)
        #[arg(long, default_value_t = 800)]
        tick_ms: u64,
    },
    /// Show a persisted analysis summary
    Summary {
        session: String,
    },
    /// Show a session's persisted chat history
    History {
        session: String,
    },
}

fn parse_expert(raw: &str) -> ParticipantInfo {
    match raw.split_once('=') {
        Some((id, name)) if !id.is_empty() && !name.is_empty() => ParticipantInfo::new(id, name),
        _ => ParticipantInfo::new(raw.to_lowercase().replace(' ', "-"), raw),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let api = CouncilApi::new(&cli.base);

    match cli.command {
        Commands::Ask {
            question,
            experts,
            session,
            verify,
            tick_ms,
        } => {
            let participants: Vec<ParticipantInfo> =
                experts.iter().map(|e| parse_expert(e)).collect();
            let config = ConsumerConfig {
                progress_interval: (tick_ms > 0).then(|| std::time::Duration::from_millis(tick_ms)),
            };
            ask(api, config, session, question, participants, verify, cli.json).await
        }
        Commands::Summary { session } => {
            let summary = api
                .fetch_summary(&session)
                .await
                .with_context(|| format!("fetching summary for {session}"))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", render::summary_report(&summary));
            }
            Ok(())
        }
        Commands::History { session } => {
            let history = api
                .fetch_history(&session)
                .await
                .with_context(|| format!("fetching history for {session}"))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                print!("{}", render::history_report(&history));
            }
            Ok(())
        }
    }
}

async fn ask(
    api: CouncilApi,
    config: ConsumerConfig,
    session: Option<String>,
    question: String,
    participants: Vec<ParticipantInfo>,
    verify: bool,
    json: bool,
) -> Result<()> {
    let mut consumer = StreamConsumer::with_config(api.clone(), config);
    let session_id = consumer
        .submit_with_id(session.unwrap_or_else(new_id), question, &participants)
        .await
        .context("could not start the analysis")?;

    let mut last_seen = 0;
    loop {
        for event in consumer.activity().since(last_seen) {
            if !json {
                eprintln!("{}", render::activity_line(event));
            }
            last_seen = event.id;
        }

        tokio::select! {
            phase = consumer.next_event() => {
                if phase.is_none() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                consumer.close();
            }
        }
    }
    for event in consumer.activity().since(last_seen) {
        if !json {
            eprintln!("{}", render::activity_line(event));
        }
    }

    let Some(live) = consumer.session() else {
        bail!("session {session_id} disappeared");
    };
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "id": live.id,
                "phase": live.phase.label(),
                "participants": live.statuses(),
                "contributions": live.contributions,
                "synthesis": live.synthesis,
                "citations": live.citations,
                "error": live.error,
            }))?
        );
    } else {
        print!("{}", render::session_report(&live));
    }

    if live.phase != SessionPhase::Complete {
        return Err(ConsumerError::MidStream {
            session_id,
            reason: live.error.clone().unwrap_or_default(),
        }
        .into());
    }

    if verify {
        let history = api
            .fetch_history(&session_id)
            .await
            .context("fetching persisted history")?;
        verify_history(&live, &history).context("live result differs from persisted history")?;
        if !json {
            eprintln!("{}", console::style("Persisted history matches").green());
        }
    }
    Ok(())
}
