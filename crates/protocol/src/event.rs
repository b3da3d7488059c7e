//! Analysis engine → client frames
//!
//! Each frame on the stream carries an event name and a JSON payload.
//! `AnalysisEvent::from_frame` turns one such pair into a typed event.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpertThinking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    pub participant_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    pub participant_name: String,
    pub content: String,
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insight_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisFrame {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
}

/// `error` frame. Participant-scoped when it names a session participant,
/// session-wide otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_name: Option<String>,
    pub message: String,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisEvent {
    UserMessage(UserMessage),
    ExpertThinking(ExpertThinking),
    Contribution(ContributionFrame),
    Synthesizing,
    Synthesis(SynthesisFrame),
    Complete,
    Error(ErrorFrame),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown frame `{0}`")]
    UnknownEvent(String),

    #[error("malformed `{event}` payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unnamed frame has no `type` field")]
    Untyped,
}

impl FrameError {
    /// Frames a reader can pass over without losing anything it understands.
    pub fn is_skippable(&self) -> bool {
        matches!(self, FrameError::UnknownEvent(_) | FrameError::Untyped)
    }
}

/// Name SSE assigns to frames without an `event:` line.
const DEFAULT_EVENT: &str = "message";

impl AnalysisEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisEvent::UserMessage(_) => "user_message",
            AnalysisEvent::ExpertThinking(_) => "expert_thinking",
            AnalysisEvent::Contribution(_) => "contribution",
            AnalysisEvent::Synthesizing => "synthesizing",
            AnalysisEvent::Synthesis(_) => "synthesis",
            AnalysisEvent::Complete => "complete",
            AnalysisEvent::Error(_) => "error",
        }
    }

    /// Decode a frame from its event name and raw `data` text.
    ///
    /// Unnamed frames fall back to the payload's `"type"` field.
    pub fn from_frame(event: &str, data: &str) -> Result<Self, FrameError> {
        let event = event.trim();
        if event.is_empty() || event == DEFAULT_EVENT {
            let (name, value) = typed_payload(data).ok_or(FrameError::Untyped)?;
            return Self::from_value(&name, value);
        }
        let value = parse_payload(event, data)?;
        Self::from_value(event, value)
    }

    fn from_value(event: &str, value: Value) -> Result<Self, FrameError> {
        let payload = |source| FrameError::Payload {
            event: event.to_string(),
            source,
        };
        let decoded = match event {
            "user_message" => {
                AnalysisEvent::UserMessage(serde_json::from_value(value).map_err(payload)?)
            }
            "expert_thinking" => {
                AnalysisEvent::ExpertThinking(serde_json::from_value(value).map_err(payload)?)
            }
            "contribution" => {
                AnalysisEvent::Contribution(serde_json::from_value(value).map_err(payload)?)
            }
            "synthesizing" => AnalysisEvent::Synthesizing,
            "synthesis" => {
                AnalysisEvent::Synthesis(serde_json::from_value(value).map_err(payload)?)
            }
            "complete" => AnalysisEvent::Complete,
            "error" => AnalysisEvent::Error(serde_json::from_value(value).map_err(payload)?),
            other => return Err(FrameError::UnknownEvent(other.to_string())),
        };
        Ok(decoded)
    }

    /// JSON payload carried in the frame's `data` field.
    pub fn payload(&self) -> Value {
        let value = match self {
            AnalysisEvent::UserMessage(p) => serde_json::to_value(p),
            AnalysisEvent::ExpertThinking(p) => serde_json::to_value(p),
            AnalysisEvent::Contribution(p) => serde_json::to_value(p),
            AnalysisEvent::Synthesis(p) => serde_json::to_value(p),
            AnalysisEvent::Error(p) => serde_json::to_value(p),
            AnalysisEvent::Synthesizing | AnalysisEvent::Complete => {
                return Value::Object(Default::default())
            }
        };
        value.unwrap_or(Value::Null)
    }

    /// Encode as one server-sent-events frame.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.payload())
    }
}

/// `"type"` and body of an unnamed frame. `None` for keep-alives and other
/// data that is not a typed JSON object.
fn typed_payload(data: &str) -> Option<(String, Value)> {
    let value: Value = serde_json::from_str(data).ok()?;
    let name = value
        .get("type")
        .and_then(Value::as_str)
        .filter(|name| *name != DEFAULT_EVENT)?
        .to_string();
    Some((name, value))
}

fn parse_payload(event: &str, data: &str) -> Result<Value, FrameError> {
    if data.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(data).map_err(|source| FrameError::Payload {
        event: event.to_string(),
        source,
    })
}
