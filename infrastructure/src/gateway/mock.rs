//! Deterministic mock provider.
//!
//! Serves two purposes: the per-call salvage path behind the orchestrator's
//! fallback (provider `mock`, model `mock-default`), and the scripted
//! participant styles the scenario tests run on. Responses are derived from
//! the request alone, never from a clock or RNG.

use super::ProviderAdapter;
use async_trait::async_trait;
use conclave_application::{
    Completion, GatewayError, GenerateRequest, ResponseFormat, MOCK_PROVIDER_ID,
};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Scripted voting temperament of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockStyle {
    /// Score 75, does not pass. Keeps meetings under an 80 threshold going.
    #[default]
    Neutral,
    /// Score 90, passes and approves.
    Optimist,
    /// Score 85, passes everything without complaint.
    Approver,
    /// Score 40, never passes.
    Rejector,
    /// Returns prose where JSON was demanded.
    BrokenJson,
    /// Every call fails with a recoverable upstream error.
    Flaky,
}

impl MockStyle {
    fn vote_json(&self, agent_id: &str) -> String {
        match self {
            MockStyle::Neutral => {
                format!(r#"{{"score": 75, "pass": false, "rationale": "neutral take from {agent_id}"}}"#)
            }
            MockStyle::Optimist => {
                format!(r#"{{"score": 90, "pass": true, "rationale": "looks right to {agent_id}"}}"#)
            }
            MockStyle::Approver => {
                format!(r#"{{"score": 85, "pass": true, "rationale": "{agent_id} approves as written"}}"#)
            }
            MockStyle::Rejector => {
                format!(r#"{{"score": 40, "pass": false, "rationale": "{agent_id} objects to the framing"}}"#)
            }
            MockStyle::BrokenJson | MockStyle::Flaky => {
                "I would rather answer in free prose today.".to_string()
            }
        }
    }
}

/// Always-available deterministic provider.
pub struct MockProvider {
    default_style: MockStyle,
    styles: HashMap<String, MockStyle>,
    facilitator_broken: bool,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            default_style: MockStyle::Neutral,
            styles: HashMap::new(),
            facilitator_broken: false,
        }
    }

    pub fn with_default_style(mut self, style: MockStyle) -> Self {
        self.default_style = style;
        self
    }

    /// Script one agent's temperament, keyed by the request metadata.
    pub fn with_style(mut self, agent_id: &str, style: MockStyle) -> Self {
        self.styles.insert(agent_id.to_string(), style);
        self
    }

    /// Make every facilitator call return unparseable output.
    pub fn with_broken_facilitator(mut self) -> Self {
        self.facilitator_broken = true;
        self
    }

    fn agent_of(request: &GenerateRequest) -> String {
        request
            .metadata
            .as_ref()
            .and_then(|m| m.get("agent_id"))
            .and_then(|v| v.as_str())
            .unwrap_or("agent")
            .to_string()
    }

    fn style_of(&self, agent_id: &str) -> MockStyle {
        self.styles.get(agent_id).copied().unwrap_or(self.default_style)
    }

    fn system_of(request: &GenerateRequest) -> String {
        request
            .messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn id(&self) -> &str {
        MOCK_PROVIDER_ID
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        _cancel: &CancellationToken,
    ) -> Result<Completion, GatewayError> {
        let system = Self::system_of(request);
        let agent_id = Self::agent_of(request);

        if self.style_of(&agent_id) == MockStyle::Flaky {
            return Err(GatewayError::Upstream {
                status: 503,
                message: format!("scripted failure for {agent_id}"),
            });
        }

        let text = if request.response_format == ResponseFormat::JsonObject {
            if system.contains("neutral facilitator") {
                if self.facilitator_broken {
                    "Round summary: things went fine (no JSON for you).".to_string()
                } else {
                    r#"{"round_summary": "Positions are converging on a phased approach.",
                        "disagreements": ["rollout pace"],
                        "proposed_patch": "Split delivery into two phases with a checkpoint.",
                        "next_focus": ["agree the checkpoint criteria"]}"#
                        .to_string()
                }
            } else {
                self.style_of(&agent_id).vote_json(&agent_id)
            }
        } else if system.contains("editor producing the final result") {
            "# Decision\nAdopt the phased rollout.\n\n## Scope & Assumptions\nScope as discussed.\n\n## Key Evidence & Trade-offs\nSpeed against operational risk.\n\n## Agreed Plan\nPhase one behind a flag, phase two after the checkpoint.\n\n## Action Items\n| Item | Owner | Due |\n|---|---|---|\n| Enable flag | ops | next week |\n\n## Risks & Mitigations\nRollback path stays live.\n\n## Open Questions\nNone blocking.\n\n## Acceptance Criteria\nError budget intact after phase one."
                .to_string()
        } else {
            let round = request
                .metadata
                .as_ref()
                .and_then(|m| m.get("round"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            format!("Round {round}: {agent_id} restates a concrete position and addresses the open points.")
        };

        Ok(Completion {
            text,
            usage: None,
            request_id: Some(format!("mock-{agent_id}")),
        })
    }
}
