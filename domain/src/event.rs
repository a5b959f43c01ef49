//! Typed meeting events.
//!
//! Events are appended to the store (which allocates the monotone id) before
//! being fanned out to live subscribers, so a replay cursor never observes a
//! gap. Payload shapes are centralised in the constructors here.

use crate::facilitator::FacilitatorOutput;
use crate::meeting::entities::Meeting;
use crate::message::Message;
use crate::vote::entities::{Vote, VoteSession, VoteSessionKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Error codes carried in `error` event payloads.
pub mod error_codes {
    /// A single agent's call failed after fallback; the round continues.
    pub const AGENT_ERROR: &str = "AGENT_ERROR";
    /// Unexpected orchestrator failure; the meeting aborts.
    pub const RUNNER_ERROR: &str = "RUNNER_ERROR";
    /// A round produced no agent message, so the vote stage was skipped.
    pub const DISCUSSION_EMPTY_SKIP_VOTE: &str = "DISCUSSION_EMPTY_SKIP_VOTE";
}

/// Event type discriminator, serialised with its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "meeting.state_changed")]
    MeetingStateChanged,
    #[serde(rename = "message.final")]
    MessageFinal,
    #[serde(rename = "facilitator.output")]
    FacilitatorOutput,
    #[serde(rename = "vote.session_started")]
    VoteSessionStarted,
    #[serde(rename = "vote.received")]
    VoteReceived,
    #[serde(rename = "vote.session_final")]
    VoteSessionFinal,
    #[serde(rename = "error")]
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MeetingStateChanged => "meeting.state_changed",
            EventKind::MessageFinal => "message.final",
            EventKind::FacilitatorOutput => "facilitator.output",
            EventKind::VoteSessionStarted => "vote.session_started",
            EventKind::VoteReceived => "vote.received",
            EventKind::VoteSessionFinal => "vote.session_final",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event before the store has allocated its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub meeting_id: String,
    pub at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl EventBody {
    fn new(meeting_id: &str, kind: EventKind, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            meeting_id: meeting_id.to_string(),
            at: now,
            kind,
            payload,
        }
    }

    pub fn state_changed(meeting: &Meeting, now: DateTime<Utc>) -> Self {
        Self::new(
            &meeting.id,
            EventKind::MeetingStateChanged,
            json!({
                "state": meeting.state,
                "round": meeting.round,
                "stage_version": meeting.stage_version,
            }),
            now,
        )
    }

    pub fn message_final(message: &Message, now: DateTime<Utc>) -> Self {
        Self::new(
            &message.meeting_id,
            EventKind::MessageFinal,
            json!({ "message": message }),
            now,
        )
    }

    pub fn facilitator_output(
        meeting_id: &str,
        stage_version: u64,
        round: u32,
        output: &FacilitatorOutput,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            meeting_id,
            EventKind::FacilitatorOutput,
            json!({
                "stage_version": stage_version,
                "round": round,
                "output": output,
            }),
            now,
        )
    }

    pub fn vote_session_started(session: &VoteSession, now: DateTime<Utc>) -> Self {
        Self::new(
            &session.meeting_id,
            EventKind::VoteSessionStarted,
            json!({
                "vote_session_id": session.id,
                "stage_version": session.stage_version,
                "kind": session.kind,
                "attempt": session.attempt,
            }),
            now,
        )
    }

    pub fn vote_received(vote: &Vote, kind: VoteSessionKind, now: DateTime<Utc>) -> Self {
        Self::new(
            &vote.meeting_id,
            EventKind::VoteReceived,
            json!({ "vote": vote, "kind": kind }),
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn vote_session_final(
        meeting_id: &str,
        vote_session_id: &str,
        stage_version: u64,
        accepted: bool,
        avg_score: u32,
        reason: &str,
        kind: VoteSessionKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            meeting_id,
            EventKind::VoteSessionFinal,
            json!({
                "vote_session_id": vote_session_id,
                "stage_version": stage_version,
                "accepted": accepted,
                "avg_score": avg_score,
                "reason": reason,
                "kind": kind,
            }),
            now,
        )
    }

    pub fn error(
        meeting_id: &str,
        code: &str,
        message: &str,
        details: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut payload = json!({ "code": code, "message": message });
        if let Some(details) = details {
            payload["details"] = details;
        }
        Self::new(meeting_id, EventKind::Error, payload, now)
    }
}

/// A persisted event with its monotone per-process id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingEvent {
    pub id: u64,
    #[serde(flatten)]
    pub body: EventBody,
}

impl MeetingEvent {
    pub fn kind(&self) -> EventKind {
        self.body.kind
    }

    pub fn meeting_id(&self) -> &str {
        &self.body.meeting_id
    }
}
