//! Domain layer for Conclave
//!
//! This crate contains the core meeting model: entities, configuration,
//! voting and threshold logic, prompt construction, and event types.
//! It has no dependencies on infrastructure or presentation concerns;
//! everything here is pure and deterministic.

pub mod core;
pub mod event;
pub mod facilitator;
pub mod meeting;
pub mod message;
pub mod prompt;
pub mod report;
pub mod util;
pub mod vote;

// Re-export commonly used types
pub use core::error::DomainError;
pub use event::{EventBody, EventKind, MeetingEvent, error_codes};
pub use facilitator::FacilitatorOutput;
pub use meeting::{
    config::{
        AgentConfig, ConfigIssue, ConfigIssueCode, DiscussionConfig, DiscussionMode,
        DiscussionModeSetting, FacilitatorConfig, MeetingConfig, OutputConfig, OutputFormat,
        Severity, ThresholdConfig, ThresholdMode,
    },
    entities::{Meeting, MeetingPatch, MeetingResult, MeetingState},
};
pub use message::{Message, MessageMeta, MessageRole, ReplyTarget, SystemSpeaker, TokenUsage};
pub use prompt::{DiscussionPromptContext, PromptBuilder, select_reply_targets};
pub use report::ReportBuilder;
pub use vote::{
    aggregate::VoteAggregate,
    entities::{Vote, VoteSession, VoteSessionKind, VoteSessionStatus},
    parsing::{ParsedVote, parse_vote_response},
    threshold::{ThresholdDecision, evaluate_threshold},
};
