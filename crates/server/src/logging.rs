use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn,reqwest=warn";
const LOG_FILE_NAME: &str = "relay.log";

pub struct LoggingHandle {
    pub run_id: String,
    pub guard: WorkerGuard,
}

/// Install the global subscriber. Logs go to `<log_dir>/relay.log`, or to
/// stderr when `stderr` is set. Keep the returned guard alive.
pub fn init_logging(log_dir: &Path, stderr: bool) -> anyhow::Result<LoggingHandle> {
    let (writer, guard, destination) = if stderr {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        (writer, guard, "stderr".to_string())
    } else {
        std::fs::create_dir_all(log_dir)?;
        let log_path = log_dir.join(LOG_FILE_NAME);

        if std::env::var("COUNCIL_RELAY_TRUNCATE_LOG_ON_START").as_deref() == Ok("1") {
            std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&log_path)?;
        }

        let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        (writer, guard, log_path.display().to_string())
    };

    let filter = std::env::var("COUNCIL_RELAY_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let format = std::env::var("COUNCIL_RELAY_LOG_FORMAT").unwrap_or_else(|_| "json".into());

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(stderr)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?;
    }

    let run_id = std::env::var("COUNCIL_RELAY_RUN_ID").unwrap_or_else(|_| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("pid-{}-{}", std::process::id(), now)
    });

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        destination = %destination,
        format = %format,
        run_id = %run_id,
        filter = %std::env::var("COUNCIL_RELAY_LOG_FILTER")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    );

    Ok(LoggingHandle { run_id, guard })
}
