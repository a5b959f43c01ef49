//! Meeting entity and lifecycle states.

use super::config::{DiscussionMode, MeetingConfig};
use crate::core::error::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topics longer than this are rejected at creation.
pub const MAX_TOPIC_CHARS: usize = 2_000;

/// Lifecycle state of a meeting.
///
/// Transitions only move forward through the orchestrator's state machine;
/// once a `Finished*` state is entered, nothing but the result is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingState {
    Draft,
    RunningDiscussion,
    RunningVote,
    FinishedAccepted,
    FinishedAborted,
}

impl MeetingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MeetingState::FinishedAccepted | MeetingState::FinishedAborted)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, MeetingState::RunningDiscussion | MeetingState::RunningVote)
    }

    /// Whether the state machine permits moving to `next`.
    ///
    /// Staying in place counts as permitted so re-applying a patch stays
    /// idempotent. Any non-terminal state may abort.
    pub fn can_transition_to(&self, next: MeetingState) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (MeetingState::Draft, MeetingState::RunningDiscussion) => true,
            (MeetingState::RunningDiscussion, MeetingState::RunningVote) => true,
            (MeetingState::RunningVote, MeetingState::RunningDiscussion) => true,
            (MeetingState::RunningVote, MeetingState::FinishedAccepted) => true,
            (state, MeetingState::FinishedAborted) => !state.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for MeetingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MeetingState::Draft => "draft",
            MeetingState::RunningDiscussion => "running_discussion",
            MeetingState::RunningVote => "running_vote",
            MeetingState::FinishedAccepted => "finished_accepted",
            MeetingState::FinishedAborted => "finished_aborted",
        };
        write!(f, "{s}")
    }
}

/// Terminal outcome persisted on the meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingResult {
    pub accepted: bool,
    /// Human-readable reason for the terminal state.
    pub reason: String,
    pub concluded_at: DateTime<Utc>,
    /// Rendered markdown report.
    pub report_markdown: String,
    /// Structured summary: final document, approvals, counts, latest draft.
    pub summary_json: serde_json::Value,
}

/// A meeting of LLM agents around one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub topic: String,
    pub state: MeetingState,
    pub round: u32,
    /// Optimistic-concurrency token: bumped on every state transition and
    /// every user interrupt, never decremented.
    pub stage_version: u64,
    pub effective_discussion_mode: Option<DiscussionMode>,
    pub active_vote_session_id: Option<String>,
    pub result: Option<MeetingResult>,
    pub config: MeetingConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    /// Create a new Draft meeting. The topic must be non-empty and at most
    /// [`MAX_TOPIC_CHARS`] characters.
    pub fn new(topic: impl Into<String>, config: MeetingConfig, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(DomainError::InvalidTopic("topic must not be empty".to_string()));
        }
        if topic.chars().count() > MAX_TOPIC_CHARS {
            return Err(DomainError::InvalidTopic(format!(
                "topic exceeds {MAX_TOPIC_CHARS} characters"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            topic,
            state: MeetingState::Draft,
            round: 0,
            stage_version: 0,
            effective_discussion_mode: None,
            active_vote_session_id: None,
            result: None,
            config,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Restricted patch applied through the store.
///
/// Applying the same patch twice is equivalent to applying it once.
#[derive(Debug, Clone, Default)]
pub struct MeetingPatch {
    pub state: Option<MeetingState>,
    pub round: Option<u32>,
    pub stage_version: Option<u64>,
    pub effective_discussion_mode: Option<DiscussionMode>,
    /// `Some(None)` clears the active session id.
    pub active_vote_session_id: Option<Option<String>>,
    pub result: Option<MeetingResult>,
}

impl MeetingPatch {
    /// Apply the patch to a meeting in place.
    ///
    /// Invariants are enforced regardless of the caller. A terminal meeting
    /// accepts only `result`; any other field in the patch is refused with
    /// [`DomainError::MeetingFinished`]. A state change the machine does not
    /// permit is refused whole with [`DomainError::InvalidTransition`].
    /// `stage_version` is clamped monotone: a lower value is simply kept at
    /// the current one. Benign races (a round advance losing to an abort)
    /// surface here as errors for the store to log, not to fail on.
    pub fn apply(&self, meeting: &mut Meeting, now: DateTime<Utc>) -> Result<(), DomainError> {
        if meeting.state.is_terminal() {
            if let Some(result) = &self.result {
                meeting.result = Some(result.clone());
                meeting.updated_at = now;
            }
            let touches_other_fields = self.state.is_some()
                || self.round.is_some()
                || self.stage_version.is_some()
                || self.effective_discussion_mode.is_some()
                || self.active_vote_session_id.is_some();
            if touches_other_fields {
                return Err(DomainError::MeetingFinished(meeting.id.clone()));
            }
            return Ok(());
        }

        if let Some(state) = self.state
            && !meeting.state.can_transition_to(state)
        {
            return Err(DomainError::InvalidTransition {
                from: meeting.state.to_string(),
                to: state.to_string(),
            });
        }

        if let Some(state) = self.state {
            meeting.state = state;
        }
        if let Some(round) = self.round {
            meeting.round = round;
        }
        if let Some(sv) = self.stage_version
            && sv > meeting.stage_version
        {
            meeting.stage_version = sv;
        }
        if let Some(mode) = self.effective_discussion_mode {
            meeting.effective_discussion_mode = Some(mode);
        }
        if let Some(active) = &self.active_vote_session_id {
            meeting.active_vote_session_id = active.clone();
        }
        if let Some(result) = &self.result {
            meeting.result = Some(result.clone());
        }
        meeting.updated_at = now;
        Ok(())
    }
}
