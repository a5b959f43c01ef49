//! Meeting configuration: participants, discussion shape, facilitation,
//! acceptance threshold, and output format.
//!
//! A configuration is frozen into the meeting at creation time and validated
//! at that boundary; a meeting is never created from a config with errors.

//!
//! Example configuration:
//!
//! ```toml
//! [discussion]
//! mode = "auto"
//! auto_parallel_min_agents = 6
//!
//! [threshold]
//! avg_score_threshold = 80
//! min_rounds = 2
//! max_rounds = 8
//! ```

use crate::core::error::DomainError;
use serde::{Deserialize, Serialize};

/// Hard bounds on the participant count.
pub const MIN_AGENTS: usize = 3;
pub const MAX_AGENTS: usize = 8;

/// Bounds on per-agent generation parameters.
pub const MAX_OUTPUT_TOKENS_MIN: u32 = 64;
pub const MAX_OUTPUT_TOKENS_MAX: u32 = 16_384;

/// Effective discussion execution mode, resolved at meeting start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionMode {
    /// Agents speak one at a time, each seeing the previous speakers' output.
    SerialTurn,
    /// All agents speak concurrently against a shared snapshot.
    ParallelRound,
}

impl std::fmt::Display for DiscussionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscussionMode::SerialTurn => write!(f, "serial_turn"),
            DiscussionMode::ParallelRound => write!(f, "parallel_round"),
        }
    }
}

/// Configured discussion mode; `Auto` resolves to an effective mode at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionModeSetting {
    #[default]
    Auto,
    SerialTurn,
    ParallelRound,
}

impl DiscussionModeSetting {
    /// Resolve the effective mode.
    ///
    /// `Auto` picks `ParallelRound` when at least `auto_parallel_min_agents`
    /// agents are enabled, otherwise `SerialTurn`. The result is stored on the
    /// meeting at start and never changes afterwards.
    pub fn resolve(&self, enabled_agents: usize, auto_parallel_min_agents: usize) -> DiscussionMode {
        match self {
            DiscussionModeSetting::SerialTurn => DiscussionMode::SerialTurn,
            DiscussionModeSetting::ParallelRound => DiscussionMode::ParallelRound,
            DiscussionModeSetting::Auto => {
                if enabled_agents >= auto_parallel_min_agents {
                    DiscussionMode::ParallelRound
                } else {
                    DiscussionMode::SerialTurn
                }
            }
        }
    }
}

/// One LLM participant in a meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique within the meeting.
    pub id: String,
    pub display_name: String,
    /// Opaque gateway provider key (e.g. "openai", "anthropic", "mock", "auto").
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_enabled() -> bool {
    true
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            provider: provider.into(),
            model: model.into(),
            system_prompt: String::new(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            enabled: true,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Discussion round shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscussionConfig {
    pub mode: DiscussionModeSetting,
    /// `auto` resolves to parallel when this many agents are enabled.
    pub auto_parallel_min_agents: usize,
    /// How many other agents each agent must address per round.
    pub cross_reply_targets_per_agent: usize,
    /// Feed the facilitator's latest round summary into later prompts.
    pub rolling_summary: bool,
    pub rolling_summary_max_chars: usize,
}

impl Default for DiscussionConfig {
    fn default() -> Self {
        Self {
            mode: DiscussionModeSetting::Auto,
            auto_parallel_min_agents: 6,
            cross_reply_targets_per_agent: 2,
            rolling_summary: true,
            rolling_summary_max_chars: 2_000,
        }
    }
}

/// Facilitator pass configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacilitatorConfig {
    pub enabled: bool,
    /// Provider override; defaults to the first enabled agent's provider.
    pub provider: Option<String>,
    /// Model override; defaults to the first enabled agent's model.
    pub model: Option<String>,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: None,
            model: None,
            temperature: 0.2,
            timeout_ms: 90_000,
        }
    }
}

/// Acceptance rule over an aggregated vote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    #[default]
    AvgScore,
    /// Anything we don't recognise; always rejects.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub mode: ThresholdMode,
    /// Accept when the integer-rounded mean score reaches this value.
    pub avg_score_threshold: u32,
    /// No vote session runs before this many rounds completed.
    pub min_rounds: u32,
    /// The meeting aborts once the round counter exceeds this.
    pub max_rounds: u32,
    pub vote_timeout_ms: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            mode: ThresholdMode::AvgScore,
            avg_score_threshold: 80,
            min_rounds: 2,
            max_rounds: 8,
            vote_timeout_ms: 30_000,
        }
    }
}

/// Result document output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

/// Severity level of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Fatal: the configuration cannot work at all.
    Error,
    /// Non-fatal: the configuration works but may not behave as expected.
    Warning,
}

/// Identifies a specific configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigIssueCode {
    TooFewAgents,
    TooManyAgents,
    TooFewEnabledAgents,
    DuplicateAgentId,
    EmptyAgentId,
    TemperatureOutOfRange,
    MaxOutputTokensOutOfRange,
    MaxRoundsBelowMinRounds,
}

/// A detected issue in a [`MeetingConfig`].
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub code: ConfigIssueCode,
    pub message: String,
}

impl ConfigIssue {
    fn error(code: ConfigIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
        }
    }
}

/// Frozen per-meeting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingConfig {
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub discussion: DiscussionConfig,
    #[serde(default)]
    pub facilitator: FacilitatorConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl MeetingConfig {
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self {
            agents,
            discussion: DiscussionConfig::default(),
            facilitator: FacilitatorConfig::default(),
            threshold: ThresholdConfig::default(),
            output: OutputConfig::default(),
        }
    }

    /// Agents that participate in rounds and votes.
    pub fn enabled_agents(&self) -> Vec<&AgentConfig> {
        self.agents.iter().filter(|a| a.enabled).collect()
    }

    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Resolve the effective discussion mode for the current participant set.
    pub fn resolve_discussion_mode(&self) -> DiscussionMode {
        self.discussion
            .mode
            .resolve(self.enabled_agents().len(), self.discussion.auto_parallel_min_agents)
    }

    /// Validate the configuration.
    ///
    /// Returns a list of issues. An empty list means the configuration is
    /// valid; any `Severity::Error` issue must reject meeting creation.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.agents.len() < MIN_AGENTS {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::TooFewAgents,
                format!("A meeting needs at least {MIN_AGENTS} agents, got {}", self.agents.len()),
            ));
        }
        if self.agents.len() > MAX_AGENTS {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::TooManyAgents,
                format!("A meeting allows at most {MAX_AGENTS} agents, got {}", self.agents.len()),
            ));
        }

        let enabled = self.enabled_agents().len();
        if self.agents.len() >= MIN_AGENTS && enabled < MIN_AGENTS {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::TooFewEnabledAgents,
                format!("At least {MIN_AGENTS} agents must be enabled, got {enabled}"),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                issues.push(ConfigIssue::error(
                    ConfigIssueCode::EmptyAgentId,
                    "Agent id must not be empty",
                ));
            }
            if !seen.insert(agent.id.as_str()) {
                issues.push(ConfigIssue::error(
                    ConfigIssueCode::DuplicateAgentId,
                    format!("Duplicate agent id: {}", agent.id),
                ));
            }
            if !(0.0..=2.0).contains(&agent.temperature) {
                issues.push(ConfigIssue::error(
                    ConfigIssueCode::TemperatureOutOfRange,
                    format!("Agent {}: temperature {} outside [0, 2]", agent.id, agent.temperature),
                ));
            }
            if !(MAX_OUTPUT_TOKENS_MIN..=MAX_OUTPUT_TOKENS_MAX).contains(&agent.max_output_tokens) {
                issues.push(ConfigIssue::error(
                    ConfigIssueCode::MaxOutputTokensOutOfRange,
                    format!(
                        "Agent {}: max_output_tokens {} outside [{MAX_OUTPUT_TOKENS_MIN}, {MAX_OUTPUT_TOKENS_MAX}]",
                        agent.id, agent.max_output_tokens
                    ),
                ));
            }
        }

        if self.threshold.max_rounds < self.threshold.min_rounds {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::MaxRoundsBelowMinRounds,
                format!(
                    "max_rounds ({}) must be >= min_rounds ({})",
                    self.threshold.max_rounds, self.threshold.min_rounds
                ),
            ));
        }

        issues
    }

    /// Validation as a hard gate: any error-severity issue rejects the
    /// configuration with the issues joined into the error message.
    pub fn ensure_valid(&self) -> Result<(), DomainError> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|issue| issue.severity == Severity::Error)
            .map(|issue| issue.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DomainError::InvalidConfig(errors.join("; ")))
        }
    }
}
