//! Stream consumer: owns one session's connection and drives its reducer.
//!
//! Frames are applied strictly one at a time, in arrival order. Awaiting the
//! next frame is an async wait on the connection's channel, interleaved with
//! an advisory progress tick. The current session is published through
//! `ArcSwapOption` for lock-free reads from other tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use council_protocol::{new_id, ActivityKind, ParticipantInfo, SessionPhase};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::activity::ActivityLog;
use crate::connection::{ConnectionHandle, StreamItem};
use crate::transition::{transition, Effect, Input, SessionState};
use crate::transport::{StreamRequest, Transport};
use crate::ConsumerError;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Interval of advisory progress ticks. `None` disables them.
    pub progress_interval: Option<Duration>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            progress_interval: Some(Duration::from_millis(800)),
        }
    }
}

pub struct StreamConsumer<T: Transport> {
    transport: T,
    config: ConsumerConfig,
    connection: Option<ConnectionHandle>,
    current: Option<SessionState>,
    snapshot: Arc<ArcSwapOption<SessionState>>,
    history: Vec<Arc<SessionState>>,
    activity: ActivityLog,
    ticker: Option<Interval>,
    open_connections: Arc<AtomicUsize>,
}

impl<T: Transport> StreamConsumer<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ConsumerConfig::default())
    }

    pub fn with_config(transport: T, config: ConsumerConfig) -> Self {
        Self {
            transport,
            config,
            connection: None,
            current: None,
            snapshot: Arc::new(ArcSwapOption::empty()),
            history: Vec::new(),
            activity: ActivityLog::new(),
            ticker: None,
            open_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submit a question under a fresh session id.
    pub async fn submit(
        &mut self,
        problem: impl Into<String>,
        participants: &[ParticipantInfo],
    ) -> Result<String, ConsumerError> {
        self.submit_with_id(new_id(), problem, participants).await
    }

    /// Submit a question. Rejected while another session is in flight.
    ///
    /// On a transport failure no session is created: the previous session
    /// (if any) stays current.
    pub async fn submit_with_id(
        &mut self,
        session_id: impl Into<String>,
        problem: impl Into<String>,
        participants: &[ParticipantInfo],
    ) -> Result<String, ConsumerError> {
        let session_id = session_id.into();
        if let Some(active) = self.current.as_ref().filter(|s| s.phase.is_active()) {
            warn!(
                component = "consumer",
                event = "consumer.submit.rejected",
                session_id = %session_id,
                active_session_id = %active.id,
                "Submission rejected: a session is already in flight"
            );
            return Err(ConsumerError::SessionInFlight {
                session_id: active.id.clone(),
            });
        }

        let problem = problem.into();
        let state = SessionState::new(&session_id, &problem, participants, now_ms());
        let state = self.apply(state, Input::Connect);

        let request = StreamRequest {
            session_id: session_id.clone(),
            message: problem,
        };
        let bytes = match self.transport.open(&request).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(
                    component = "consumer",
                    event = "consumer.connect_failed",
                    session_id = %session_id,
                    error = %e,
                    "Could not open analysis stream"
                );
                self.activity.append(
                    ActivityKind::Error,
                    format!("Could not reach the analysis engine: {e}"),
                    None,
                    now_ms(),
                );
                return Err(ConsumerError::Transport(e));
            }
        };

        if let Some(previous) = self.current.take() {
            self.history.push(Arc::new(previous));
        }
        self.connection = Some(ConnectionHandle::spawn(
            &session_id,
            bytes,
            self.open_connections.clone(),
        ));
        self.ticker = self.config.progress_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        self.current = Some(state);
        self.publish();

        info!(
            component = "consumer",
            event = "consumer.session.started",
            session_id = %session_id,
            participants = participants.len(),
        );
        Ok(session_id)
    }

    /// Close whatever is in flight, then submit.
    pub async fn supersede(
        &mut self,
        problem: impl Into<String>,
        participants: &[ParticipantInfo],
    ) -> Result<String, ConsumerError> {
        self.close();
        self.submit(problem, participants).await
    }

    /// Wait for the next frame (or tick) and apply it.
    ///
    /// Returns the phase afterwards, or `None` when no connection is open.
    pub async fn next_event(&mut self) -> Option<SessionPhase> {
        let connection = self.connection.as_mut()?;
        let ticker = &mut self.ticker;

        let input = tokio::select! {
            item = connection.next() => match item {
                Some(StreamItem::Frame(event)) => Input::Frame(event),
                Some(StreamItem::Failed(reason)) => Input::StreamFailed { reason },
                Some(StreamItem::Ended) | None => Input::StreamEnded,
            },
            _ = tick(ticker) => Input::ProgressTick,
        };

        let state = self.current.take()?;
        let state = self.apply(state, input);
        let phase = state.phase;
        self.current = Some(state);
        self.publish();
        Some(phase)
    }

    /// Drive the current session until its connection closes.
    ///
    /// `Ok` with the final snapshot when it completed; `MidStream` when it
    /// errored (partial state stays readable through `session()`).
    pub async fn run(&mut self) -> Result<Arc<SessionState>, ConsumerError> {
        while self.next_event().await.is_some() {}

        let session = self.session().ok_or(ConsumerError::NoSession)?;
        match session.phase {
            SessionPhase::Complete => Ok(session),
            _ => Err(ConsumerError::MidStream {
                session_id: session.id.clone(),
                reason: session
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("session ended in phase {}", session.phase.label())),
            }),
        }
    }

    /// Close the connection now. An in-flight session becomes `Errored`
    /// with its partial results kept.
    pub fn close(&mut self) {
        if let Some(state) = self.current.take() {
            let state = self.apply(state, Input::Cancelled);
            self.current = Some(state);
            self.publish();
        }
        self.release_connection();
    }

    pub fn session(&self) -> Option<Arc<SessionState>> {
        self.snapshot.load_full()
    }

    /// Shared handle for reading the current session from other tasks.
    pub fn snapshot_handle(&self) -> Arc<ArcSwapOption<SessionState>> {
        self.snapshot.clone()
    }

    /// Earlier sessions, oldest first. Never mutated.
    pub fn history(&self) -> &[Arc<SessionState>] {
        &self.history
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    pub fn has_open_connection(&self) -> bool {
        self.connection.as_ref().is_some_and(ConnectionHandle::is_open)
    }

    /// Run the reducer and execute its effects.
    fn apply(&mut self, state: SessionState, input: Input) -> SessionState {
        let now = now_ms();
        let (state, effects) = transition(state, input, now);
        for effect in effects {
            match effect {
                Effect::Log(entry) => {
                    self.activity
                        .append(entry.kind, entry.message, entry.participant_name, now);
                }
                Effect::CloseConnection => self.release_connection(),
                Effect::Anomaly(message) => {
                    warn!(
                        component = "consumer",
                        event = "consumer.frame.anomaly",
                        session_id = %state.id,
                        message = %message,
                        "Frame could not be applied"
                    );
                    self.activity.append(
                        ActivityKind::Error,
                        format!("Ignored frame: {message}"),
                        None,
                        now,
                    );
                }
            }
        }
        state
    }

    fn release_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.ticker = None;
    }

    fn publish(&self) {
        self.snapshot
            .store(self.current.as_ref().map(|s| Arc::new(s.clone())));
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
