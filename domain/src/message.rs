//! Immutable meeting messages.
//!
//! Messages are append-only records owned by one meeting. Agent messages
//! carry round metadata, reply targets, and provider provenance; system
//! messages come from the facilitator or the orchestrator itself.

use crate::meeting::config::DiscussionMode;
use crate::util::truncate_str;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message bodies beyond this are truncated at construction.
pub const MAX_CONTENT_CHARS: usize = 50_000;

/// Quoted excerpts inside reply targets are capped at this many characters.
pub const MAX_QUOTE_CHARS: usize = 200;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

/// Non-agent system speakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemSpeaker {
    Facilitator,
    Orchestrator,
}

/// A cross-reference an agent is required to address this round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

impl ReplyTarget {
    pub fn new(agent_id: impl Into<String>, quote: Option<&str>) -> Self {
        Self {
            agent_id: agent_id.into(),
            quote: quote.map(|q| truncate_str(q, MAX_QUOTE_CHARS).to_string()),
        }
    }
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

/// Metadata attached to each message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MessageMeta {
    pub round: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discussion_mode: Option<DiscussionMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reply_targets: Vec<ReplyTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Records fallback provenance, e.g. `fallback:openai->mock`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_request_id: Option<String>,
}

impl MessageMeta {
    pub fn for_round(round: u32) -> Self {
        Self { round, ..Default::default() }
    }
}

/// An immutable, append-only meeting message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub meeting_id: String,
    pub created_at: DateTime<Utc>,
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_id: Option<SystemSpeaker>,
    pub content: String,
    pub meta: MessageMeta,
}

impl Message {
    fn base(content: String, now: DateTime<Utc>) -> (String, String, DateTime<Utc>) {
        let content = truncate_str(&content, MAX_CONTENT_CHARS).to_string();
        (Uuid::new_v4().to_string(), content, now)
    }

    pub fn agent(
        meeting_id: impl Into<String>,
        agent_id: impl Into<String>,
        content: impl Into<String>,
        meta: MessageMeta,
        now: DateTime<Utc>,
    ) -> Self {
        let meeting_id = meeting_id.into();
        let (id, content, created_at) = Self::base(content.into(), now);
        Self {
            id,
            meeting_id,
            created_at,
            role: MessageRole::Agent,
            agent_id: Some(agent_id.into()),
            system_id: None,
            content,
            meta,
        }
    }

    pub fn user(
        meeting_id: impl Into<String>,
        content: impl Into<String>,
        round: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let meeting_id = meeting_id.into();
        let (id, content, created_at) = Self::base(content.into(), now);
        Self {
            id,
            meeting_id,
            created_at,
            role: MessageRole::User,
            agent_id: None,
            system_id: None,
            content,
            meta: MessageMeta::for_round(round),
        }
    }

    pub fn system(
        meeting_id: impl Into<String>,
        speaker: SystemSpeaker,
        content: impl Into<String>,
        round: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let meeting_id = meeting_id.into();
        let (id, content, created_at) = Self::base(content.into(), now);
        Self {
            id,
            meeting_id,
            created_at,
            role: MessageRole::System,
            agent_id: None,
            system_id: Some(speaker),
            content,
            meta: MessageMeta::for_round(round),
        }
    }

    /// Display label for prompts and reports: agent id, system speaker, or "user".
    pub fn speaker_label(&self) -> &str {
        match self.role {
            MessageRole::Agent => self.agent_id.as_deref().unwrap_or("agent"),
            MessageRole::User => "user",
            MessageRole::System => match self.system_id {
                Some(SystemSpeaker::Facilitator) => "facilitator",
                _ => "orchestrator",
            },
        }
    }
}
