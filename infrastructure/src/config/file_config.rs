//! File-level configuration (`conclave.toml`).
//!
//! Example configuration:
//!
//! ```toml
//! topic = "Decide the Q3 rollout plan"
//!
//! [[agent]]
//! id = "pragmatist"
//! provider = "openai"
//! model = "gpt-4.1"
//! system_prompt = "You are a pragmatic platform engineer."
//!
//! [discussion]
//! mode = "auto"
//!
//! [threshold]
//! avg_score_threshold = 80
//! min_rounds = 2
//! max_rounds = 8
//!
//! [providers]
//! openai_api_key = "sk-..."
//! ```

use conclave_domain::{
    AgentConfig, DiscussionConfig, FacilitatorConfig, MeetingConfig, OutputConfig, ThresholdConfig,
};
use serde::{Deserialize, Serialize};

/// One `[[agent]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAgentConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub provider: String,
    pub model: String,
    #[serde(default)]
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

impl FileAgentConfig {
    fn into_domain(self) -> AgentConfig {
        AgentConfig {
            display_name: self.display_name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            provider: self.provider,
            model: self.model,
            system_prompt: self.system_prompt,
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            enabled: self.enabled,
        }
    }
}

/// Provider credentials (`[providers]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileProvidersConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

/// The whole config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub topic: Option<String>,
    #[serde(rename = "agent")]
    pub agents: Vec<FileAgentConfig>,
    pub discussion: DiscussionConfig,
    pub facilitator: FacilitatorConfig,
    pub threshold: ThresholdConfig,
    pub output: OutputConfig,
    pub providers: FileProvidersConfig,
}

impl FileConfig {
    /// Convert into the domain config. Validation happens at meeting
    /// creation, not here.
    pub fn to_meeting_config(&self) -> MeetingConfig {
        MeetingConfig {
            agents: self.agents.iter().cloned().map(FileAgentConfig::into_domain).collect(),
            discussion: self.discussion.clone(),
            facilitator: self.facilitator.clone(),
            threshold: self.threshold.clone(),
            output: self.output.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::DiscussionModeSetting;

    #[test]
    fn minimal_toml_parses_with_defaults() {
        let toml = r#"
            topic = "Pick a database"

            [[agent]]
            id = "a"
            provider = "mock"
            model = "mock-default"

            [[agent]]
            id = "b"
            provider = "mock"
            model = "mock-default"

            [[agent]]
            id = "c"
            provider = "mock"
            model = "mock-default"
        "#;
        let config: FileConfig = toml_from_str(toml);
        assert_eq!(config.topic.as_deref(), Some("Pick a database"));
        assert_eq!(config.agents.len(), 3);
        assert_eq!(config.discussion.mode, DiscussionModeSetting::Auto);
        assert_eq!(config.threshold.avg_score_threshold, 80);
        assert_eq!(config.threshold.min_rounds, 2);
        assert_eq!(config.threshold.max_rounds, 8);
        assert!(config.facilitator.enabled);

        let meeting_config = config.to_meeting_config();
        assert!(meeting_config.validate().is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let toml = r#"
            [[agent]]
            id = "a"
            provider = "mock"
            model = "mock-default"
            temperature = 0.3

            [discussion]
            mode = "parallel_round"
            cross_reply_targets_per_agent = 1

            [threshold]
            avg_score_threshold = 90
            vote_timeout_ms = 45000

            [facilitator]
            enabled = false
        "#;
        let config: FileConfig = toml_from_str(toml);
        assert_eq!(config.agents[0].temperature, 0.3);
        assert_eq!(config.discussion.mode, DiscussionModeSetting::ParallelRound);
        assert_eq!(config.discussion.cross_reply_targets_per_agent, 1);
        assert_eq!(config.threshold.avg_score_threshold, 90);
        assert_eq!(config.threshold.vote_timeout_ms, 45_000);
        assert!(!config.facilitator.enabled);
    }

    #[test]
    fn display_name_defaults_to_id() {
        let toml = r#"
            [[agent]]
            id = "critic"
            provider = "mock"
            model = "mock-default"
        "#;
        let config: FileConfig = toml_from_str(toml);
        let domain = config.to_meeting_config();
        assert_eq!(domain.agents[0].display_name, "critic");
    }

    fn toml_from_str(s: &str) -> FileConfig {
        use figment::providers::Format;
        figment::Figment::new()
            .merge(figment::providers::Serialized::defaults(FileConfig::default()))
            .merge(figment::providers::Toml::string(s))
            .extract()
            .unwrap()
    }
}
