//! Create Meeting use case
//!
//! Boundary validation: a meeting is only created from a config with no
//! error-severity issues and a well-formed topic. Nothing is persisted on
//! rejection.

use crate::ports::store::{MeetingStore, StoreError};
use chrono::Utc;
use conclave_domain::{DomainError, Meeting, MeetingConfig};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that can occur when creating a meeting
#[derive(Error, Debug)]
pub enum CreateMeetingError {
    /// Invalid configuration or topic; nothing was persisted.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Use case for creating a Draft meeting.
pub struct CreateMeetingUseCase {
    store: Arc<dyn MeetingStore>,
}

impl CreateMeetingUseCase {
    pub fn new(store: Arc<dyn MeetingStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, topic: &str, config: MeetingConfig) -> Result<Meeting, CreateMeetingError> {
        config.ensure_valid()?;
        let meeting = Meeting::new(topic, config, Utc::now())?;
        let meeting = self.store.create_meeting(meeting).await?;
        info!(meeting_id = %meeting.id, "meeting created");
        Ok(meeting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::store::tests_support::StubStore;
    use conclave_domain::{AgentConfig, MeetingState};

    fn config(agents: usize) -> MeetingConfig {
        MeetingConfig::new(
            (0..agents)
                .map(|i| AgentConfig::new(format!("agent-{i}"), "mock", "mock-default"))
                .collect(),
        )
    }

    #[tokio::test]
    async fn creates_draft_meeting() {
        let store = Arc::new(StubStore::default());
        let use_case = CreateMeetingUseCase::new(store);
        let meeting = use_case.execute("Rollout plan", config(4)).await.unwrap();
        assert_eq!(meeting.state, MeetingState::Draft);
        assert_eq!(meeting.stage_version, 0);
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let store = Arc::new(StubStore::default());
        let use_case = CreateMeetingUseCase::new(store);
        let error = use_case.execute("t", config(2)).await.unwrap_err();
        assert!(matches!(
            error,
            CreateMeetingError::Domain(DomainError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn rejects_empty_topic() {
        let store = Arc::new(StubStore::default());
        let use_case = CreateMeetingUseCase::new(store);
        let error = use_case.execute("  ", config(3)).await.unwrap_err();
        assert!(matches!(
            error,
            CreateMeetingError::Domain(DomainError::InvalidTopic(_))
        ));
    }
}
