//! Final report rendering.
//!
//! Builds the human-readable markdown report and the structured summary
//! persisted in the meeting result. Pure over its inputs.

use crate::meeting::entities::Meeting;
use crate::message::{Message, MessageRole};
use crate::vote::aggregate::VoteAggregate;
use crate::vote::entities::Vote;
use serde_json::{Value, json};

/// Renders the terminal artifacts of a meeting.
pub struct ReportBuilder;

impl ReportBuilder {
    /// Render the markdown report: outcome header, final document, approval
    /// table, and meeting statistics.
    pub fn build_markdown(
        meeting: &Meeting,
        messages: &[Message],
        votes: &[Vote],
        final_document: Option<&str>,
        approvals: &[Vote],
        reason: &str,
        accepted: bool,
    ) -> String {
        let mut out = String::new();

        out.push_str(&format!("# Meeting Report: {}\n\n", meeting.topic));
        out.push_str(&format!(
            "- Outcome: **{}**\n- Reason: {}\n- Rounds: {}\n",
            if accepted { "accepted" } else { "aborted" },
            reason,
            meeting.round,
        ));
        if let Some(mode) = meeting.effective_discussion_mode {
            out.push_str(&format!("- Discussion mode: {mode}\n"));
        }
        out.push('\n');

        if let Some(document) = final_document {
            out.push_str("## Final Result Document\n\n");
            out.push_str(document);
            out.push_str("\n\n");
        }

        if !approvals.is_empty() {
            out.push_str("## Approvals\n\n");
            out.push_str("| Agent | Score | Pass | Rationale |\n|---|---|---|---|\n");
            for vote in approvals {
                out.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    vote.voter_agent_id,
                    vote.score,
                    if vote.pass { "yes" } else { "no" },
                    vote.rationale.as_deref().unwrap_or("").replace('\n', " "),
                ));
            }
            out.push('\n');
        }

        let aggregate = VoteAggregate::from_votes(votes);
        out.push_str("## Statistics\n\n");
        out.push_str(&format!(
            "- Agent messages: {}\n- Votes cast: {}\n",
            messages.iter().filter(|m| m.role == MessageRole::Agent).count(),
            votes.len(),
        ));
        if !aggregate.is_empty() {
            out.push_str(&format!(
                "- Last known score spread: avg {} (min {}, max {})\n",
                aggregate.avg_score, aggregate.min_score, aggregate.max_score,
            ));
        }

        out
    }

    /// Structured summary persisted alongside the markdown report.
    pub fn build_summary_json(
        meeting: &Meeting,
        messages: &[Message],
        votes: &[Vote],
        final_document: Option<&str>,
        approvals: &[Vote],
        reason: &str,
        accepted: bool,
    ) -> Value {
        json!({
            "accepted": accepted,
            "reason": reason,
            "topic": meeting.topic,
            "rounds": meeting.round,
            "final_document_markdown": final_document,
            "approvals": approvals.iter().map(|v| json!({
                "agent_id": v.voter_agent_id,
                "score": v.score,
                "pass": v.pass,
                "rationale": v.rationale,
            })).collect::<Vec<_>>(),
            "message_count": messages.len(),
            "vote_count": votes.len(),
        })
    }
}
