//! Reply-target selection.
//!
//! Each discussion round (after the blind Round 0) requires every agent to
//! address the most recent point of one or two other agents. Selection scans
//! the transcript newest-first and keeps the newest message per distinct
//! other agent until the cap is reached.

use crate::message::{Message, MessageRole, ReplyTarget};
use std::collections::HashSet;

/// Pick reply targets for `self_agent_id` from a chronological transcript.
///
/// Returns at most `cap` targets, newest speaker first. Own messages, user
/// messages, and system messages are never targets.
pub fn select_reply_targets(self_agent_id: &str, messages: &[Message], cap: usize) -> Vec<ReplyTarget> {
    if cap == 0 {
        return Vec::new();
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut targets = Vec::new();

    for message in messages.iter().rev() {
        if message.role != MessageRole::Agent {
            continue;
        }
        let Some(agent_id) = message.agent_id.as_deref() else {
            continue;
        };
        if agent_id == self_agent_id || !seen.insert(agent_id) {
            continue;
        }
        targets.push(ReplyTarget::new(agent_id, Some(&message.content)));
        if targets.len() == cap {
            break;
        }
    }

    targets
}
