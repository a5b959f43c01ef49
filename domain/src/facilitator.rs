//! Facilitator output schema.
//!
//! The facilitator is asked for a JSON object shaped as
//! `{disagreements: string[1..3], proposed_patch: string(<=4000),
//! next_focus: string[1..2], round_summary: string(<=2000)}`.
//! Parsing clamps overlong fields instead of rejecting them; a response with
//! no usable JSON becomes the fallback sentinel.

use crate::util::truncate_str;
use crate::vote::parsing::extract_json_object;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_DISAGREEMENTS: usize = 3;
pub const MAX_NEXT_FOCUS: usize = 2;
pub const MAX_PATCH_CHARS: usize = 4_000;
pub const MAX_SUMMARY_CHARS: usize = 2_000;

const FALLBACK_SUMMARY: &str = "Facilitator output unavailable.";

/// Structured round summary produced by the facilitator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitatorOutput {
    pub round_summary: String,
    pub disagreements: Vec<String>,
    pub proposed_patch: String,
    pub next_focus: Vec<String>,
}

impl FacilitatorOutput {
    /// Parse a facilitator completion. Returns `None` when the response
    /// contains no JSON object with a usable `round_summary`.
    pub fn parse(response: &str) -> Option<Self> {
        let object = extract_json_object(response)?;

        let round_summary = object.get("round_summary").and_then(Value::as_str)?;
        if round_summary.trim().is_empty() {
            return None;
        }

        let strings = |key: &str, cap: usize| -> Vec<String> {
            object
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|s| !s.trim().is_empty())
                        .take(cap)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        Some(Self {
            round_summary: truncate_str(round_summary, MAX_SUMMARY_CHARS).to_string(),
            disagreements: strings("disagreements", MAX_DISAGREEMENTS),
            proposed_patch: object
                .get("proposed_patch")
                .and_then(Value::as_str)
                .map(|s| truncate_str(s, MAX_PATCH_CHARS).to_string())
                .unwrap_or_default(),
            next_focus: strings("next_focus", MAX_NEXT_FOCUS),
        })
    }

    /// Sentinel recorded when every parse attempt failed. A round whose
    /// facilitator pass produced only this is skipped.
    pub fn fallback() -> Self {
        Self {
            round_summary: FALLBACK_SUMMARY.to_string(),
            disagreements: Vec::new(),
            proposed_patch: String::new(),
            next_focus: Vec::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.round_summary == FALLBACK_SUMMARY
    }

    /// Render as markdown for the system message appended to the meeting:
    /// round summary, then disagreements, proposed patch, next focus.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("## Round Summary\n\n");
        out.push_str(&self.round_summary);
        out.push('\n');

        if !self.disagreements.is_empty() {
            out.push_str("\n## Disagreements\n\n");
            for item in &self.disagreements {
                out.push_str(&format!("- {item}\n"));
            }
        }
        if !self.proposed_patch.is_empty() {
            out.push_str("\n## Proposed Patch\n\n");
            out.push_str(&self.proposed_patch);
            out.push('\n');
        }
        if !self.next_focus.is_empty() {
            out.push_str("\n## Next Focus\n\n");
            for item in &self.next_focus {
                out.push_str(&format!("- {item}\n"));
            }
        }
        out
    }
}
