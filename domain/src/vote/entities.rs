//! Vote and vote-session entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single agent's vote on a proposal, stamped with the stage version it
/// was produced under. A vote is only persisted while the meeting's stage
/// version still matches; stale votes are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub meeting_id: String,
    pub vote_session_id: String,
    pub voter_agent_id: String,
    /// 0..=100.
    pub score: u32,
    pub pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub stage_version: u64,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(
        meeting_id: impl Into<String>,
        vote_session_id: impl Into<String>,
        voter_agent_id: impl Into<String>,
        score: u32,
        pass: bool,
        rationale: Option<String>,
        stage_version: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            meeting_id: meeting_id.into(),
            vote_session_id: vote_session_id.into(),
            voter_agent_id: voter_agent_id.into(),
            score: score.min(100),
            pass,
            rationale,
            stage_version,
            created_at: now,
        }
    }
}

/// Lifecycle status of a vote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteSessionStatus {
    /// Votes are being collected.
    Running,
    /// Evaluation completed at the session's stage version.
    Finalized,
    /// A user interrupt lifted the stage version mid-session.
    Aborted,
    /// A final-document attempt failed unanimity.
    Incomplete,
}

impl VoteSessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VoteSessionStatus::Running)
    }
}

/// What a session is voting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoteSessionKind {
    /// Score vote over the mechanically-joined round proposal.
    #[default]
    Proposal,
    /// Unanimous approval vote over the final result document.
    Approval,
}

/// A bounded set of vote calls over a single proposal text at a single
/// stage version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteSession {
    pub id: String,
    pub meeting_id: String,
    pub round: u32,
    pub stage_version: u64,
    pub proposal_text: String,
    pub status: VoteSessionStatus,
    #[serde(default)]
    pub kind: VoteSessionKind,
    /// Approval attempt number (1-based), for `Approval` sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub expected_voter_agent_ids: Vec<String>,
}

impl VoteSession {
    pub fn start(
        meeting_id: impl Into<String>,
        round: u32,
        stage_version: u64,
        proposal_text: impl Into<String>,
        kind: VoteSessionKind,
        expected_voter_agent_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            meeting_id: meeting_id.into(),
            round,
            stage_version,
            proposal_text: proposal_text.into(),
            status: VoteSessionStatus::Running,
            kind,
            attempt: None,
            started_at: now,
            ended_at: None,
            expected_voter_agent_ids,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}
