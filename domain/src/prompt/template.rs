//! Prompt templates for every meeting stage.

use crate::message::{Message, MessageRole, ReplyTarget};
use crate::util::{truncate_str, truncate_with_ellipsis};

/// How many transcript messages a discussion prompt carries.
pub const RECENT_MESSAGES_MAX: usize = 10;
/// Per-message excerpt cap inside prompts and proposals.
pub const MESSAGE_EXCERPT_MAX_CHARS: usize = 800;
/// Final-document context caps: base proposal and recent discussion.
pub const FINAL_DOC_PROPOSAL_MAX_BYTES: usize = 5 * 1024;
pub const FINAL_DOC_DISCUSSION_MAX_BYTES: usize = 7 * 1024;
/// Dissenter rationales carried into a revision pass.
pub const OBJECTION_MAX_CHARS: usize = 400;
pub const OBJECTIONS_MAX: usize = 12;

/// Inputs for one agent's discussion prompt.
#[derive(Debug, Clone)]
pub struct DiscussionPromptContext<'a> {
    pub topic: &'a str,
    pub round: u32,
    pub rolling_summary: Option<&'a str>,
    pub rolling_summary_max_chars: usize,
    /// Chronological transcript window; only the last
    /// [`RECENT_MESSAGES_MAX`] entries are rendered.
    pub recent_messages: &'a [Message],
    /// User messages from this and prior rounds.
    pub user_messages: &'a [Message],
    pub reply_targets: &'a [ReplyTarget],
}

/// Templates for generating prompts at each meeting stage.
pub struct PromptBuilder;

impl PromptBuilder {
    /// User-role block for a discussion turn. Round 0 contexts carry no
    /// transcript and no reply targets, which renders the blind prompt.
    pub fn discussion_prompt(ctx: &DiscussionPromptContext) -> String {
        let mut prompt = format!("Topic: {}\nRound: {}\n", ctx.topic, ctx.round);

        if let Some(summary) = ctx.rolling_summary {
            prompt.push_str(&format!(
                "\nRolling summary of the discussion so far:\n{}\n",
                truncate_str(summary, ctx.rolling_summary_max_chars)
            ));
        }

        let window_start = ctx.recent_messages.len().saturating_sub(RECENT_MESSAGES_MAX);
        let window = &ctx.recent_messages[window_start..];
        if !window.is_empty() {
            prompt.push_str("\nRecent discussion:\n");
            for message in window {
                prompt.push_str(&format!(
                    "[{}] {}\n",
                    message.speaker_label(),
                    truncate_with_ellipsis(&message.content, MESSAGE_EXCERPT_MAX_CHARS)
                ));
            }
        }

        if !ctx.user_messages.is_empty() {
            prompt.push_str("\nGuidance from the user:\n");
            for message in ctx.user_messages {
                prompt.push_str(&format!(
                    "- {}\n",
                    truncate_with_ellipsis(&message.content, MESSAGE_EXCERPT_MAX_CHARS)
                ));
            }
        }

        if !ctx.reply_targets.is_empty() {
            prompt.push_str("\nYou MUST respond to:\n");
            for target in ctx.reply_targets {
                match &target.quote {
                    Some(quote) => {
                        prompt.push_str(&format!("- {}: \"{}\"\n", target.agent_id, quote))
                    }
                    None => prompt.push_str(&format!("- {}\n", target.agent_id)),
                }
            }
        }

        prompt.push_str(
            r#"
Instructions:
1. Make 1-3 core points. Be concrete and stay on topic.
2. If you disagree with another participant, you must propose an alternative, not just object.
3. Keep your contribution focused; do not repeat points already settled."#,
        );

        prompt
    }

    /// System prompt for a proposal vote: the agent's own system prompt
    /// augmented with a strict JSON contract.
    pub fn vote_system(agent_system_prompt: &str) -> String {
        let contract = r#"You are voting on a proposal. Respond with ONLY a JSON object:
{"score": <integer 0-100>, "pass": <true|false>, "rationale": "<short reason>"}
No prose outside the JSON object."#;
        if agent_system_prompt.trim().is_empty() {
            contract.to_string()
        } else {
            format!("{agent_system_prompt}\n\n{contract}")
        }
    }

    pub fn vote_prompt(topic: &str, rolling_summary: Option<&str>, proposal_text: &str) -> String {
        let mut prompt = format!("Topic: {topic}\n");
        if let Some(summary) = rolling_summary {
            prompt.push_str(&format!("\nRolling summary:\n{summary}\n"));
        }
        prompt.push_str(&format!(
            "\nProposal under vote:\n{proposal_text}\n\nScore this proposal from 0 to 100 and state whether it should pass."
        ));
        prompt
    }

    /// Fixed facilitator system prompt demanding the structured schema.
    pub fn facilitator_system() -> &'static str {
        r#"You are the neutral facilitator of a multi-agent discussion.
Summarize the round faithfully; do not add your own position.
Respond with ONLY a JSON object of this exact shape:
{"round_summary": "<string, at most 2000 chars>",
 "disagreements": ["<1 to 3 strings>"],
 "proposed_patch": "<string, at most 4000 chars>",
 "next_focus": ["<1 to 2 strings>"]}"#
    }

    pub fn facilitator_prompt(
        topic: &str,
        round: u32,
        rolling_summary: Option<&str>,
        recent_messages: &[Message],
        proposal_draft: &str,
    ) -> String {
        let mut prompt = format!("Topic: {topic}\nRound just completed: {round}\n");
        if let Some(summary) = rolling_summary {
            prompt.push_str(&format!("\nPrevious rolling summary:\n{summary}\n"));
        }
        if !recent_messages.is_empty() {
            prompt.push_str("\nMessages from this round:\n");
            for message in recent_messages {
                prompt.push_str(&format!(
                    "[{}] {}\n",
                    message.speaker_label(),
                    truncate_with_ellipsis(&message.content, MESSAGE_EXCERPT_MAX_CHARS)
                ));
            }
        }
        prompt.push_str(&format!(
            "\nCurrent proposal draft:\n{}\n\nProduce the JSON summary now.",
            truncate_with_ellipsis(proposal_draft, FINAL_DOC_PROPOSAL_MAX_BYTES)
        ));
        prompt
    }

    /// System prompt for drafting and revising the final result document.
    pub fn final_document_system() -> &'static str {
        r#"You are the editor producing the final result document of a concluded discussion.
Write clean markdown with exactly these sections, in this order:
# Decision
## Scope & Assumptions
## Key Evidence & Trade-offs
## Agreed Plan
## Action Items
(a markdown table with columns: Item | Owner | Due)
## Risks & Mitigations
## Open Questions
## Acceptance Criteria
Base every statement on the discussion; do not invent outcomes."#
    }

    /// User block for the first drafting pass. Context is truncated to keep
    /// the request reliably inside provider limits.
    pub fn final_document_prompt(topic: &str, proposal_text: &str, recent_discussion: &str) -> String {
        format!(
            "Topic: {topic}\n\nAccepted proposal:\n{}\n\nRecent discussion:\n{}\n\nWrite the final result document now.",
            truncate_str(proposal_text, FINAL_DOC_PROPOSAL_MAX_BYTES),
            truncate_str(recent_discussion, FINAL_DOC_DISCUSSION_MAX_BYTES),
        )
    }

    /// System prompt for a final-document approval review.
    pub fn approval_system(agent_system_prompt: &str) -> String {
        let contract = r#"You are reviewing the final result document of a discussion you took part in.
Approve only if the document faithfully captures the agreed outcome.
Respond with ONLY a JSON object:
{"score": <integer 0-100>, "pass": <true|false>, "rationale": "<short reason>"}"#;
        if agent_system_prompt.trim().is_empty() {
            contract.to_string()
        } else {
            format!("{agent_system_prompt}\n\n{contract}")
        }
    }

    pub fn approval_prompt(topic: &str, draft: &str) -> String {
        format!("Topic: {topic}\n\nFinal result document draft:\n{draft}\n\nReview the draft and vote.")
    }

    /// Revision pass carrying dissenters' objections verbatim (capped).
    pub fn revision_prompt(draft: &str, objections: &[(String, String)]) -> String {
        let mut prompt = format!("Current draft:\n{draft}\n\nThe following reviewers did not approve:\n");
        for (agent_id, rationale) in objections.iter().take(OBJECTIONS_MAX) {
            prompt.push_str(&format!(
                "- {agent_id}: {}\n",
                truncate_with_ellipsis(rationale, OBJECTION_MAX_CHARS)
            ));
        }
        prompt.push_str("\nRevise the document to satisfy these objections while preserving the agreed outcome. Keep the exact section outline. Output only the revised markdown.");
        prompt
    }

    /// Mechanically join the latest round's agent messages into the Phase-1
    /// proposal text, each excerpt prefixed with its agent id.
    pub fn build_proposal_text(round_messages: &[Message]) -> String {
        let mut proposal = String::new();
        for message in round_messages {
            if message.role != MessageRole::Agent {
                continue;
            }
            proposal.push_str(&format!(
                "[{}] {}\n\n",
                message.speaker_label(),
                truncate_with_ellipsis(&message.content, MESSAGE_EXCERPT_MAX_CHARS)
            ));
        }
        proposal.trim_end().to_string()
    }
}
