//! Append-only activity feed for session lifecycle events.
//!
//! Ids come from a process-wide counter, so they keep increasing across
//! sessions and across log instances.

use std::sync::atomic::{AtomicU64, Ordering};

use council_protocol::{ActivityEvent, ActivityKind};
use tracing::debug;

static NEXT_ACTIVITY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: Vec<ActivityEvent>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry and return it.
    pub fn append(
        &mut self,
        kind: ActivityKind,
        message: impl Into<String>,
        participant_name: Option<String>,
        timestamp: u64,
    ) -> &ActivityEvent {
        let event = ActivityEvent {
            id: NEXT_ACTIVITY_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            message: message.into(),
            participant_name,
            timestamp,
        };
        debug!(
            component = "activity",
            event = "activity.appended",
            activity_id = event.id,
            kind = ?event.kind,
            message = %event.message,
        );
        self.entries.push(event);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[ActivityEvent] {
        &self.entries
    }

    /// Entries appended after the entry with id `after`.
    pub fn since(&self, after: u64) -> &[ActivityEvent] {
        let start = self.entries.partition_point(|e| e.id <= after);
        &self.entries[start..]
    }

    pub fn last(&self) -> Option<&ActivityEvent> {
        self.entries.last()
    }

    pub fn count(&self, kind: ActivityKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
