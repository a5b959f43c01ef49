//! Runtime binder.
//!
//! The composition root for one process: one store, one gateway, one event
//! bus, and a map of per-meeting runners. Construction is cheap; the global
//! install is idempotent so development hot-reload paths can call it
//! repeatedly and keep the first instance.

use crate::event_bus::{EventBus, Subscription};
use conclave_application::{
    CreateMeetingError, CreateMeetingUseCase, EventPublisher, LlmGateway, MeetingRunner,
    MeetingStore, NoopTranscriptLogger, RunMeetingError, StoreError, TranscriptLogger,
};
use conclave_domain::{Meeting, MeetingConfig, Message};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

static GLOBAL: OnceLock<Arc<Runtime>> = OnceLock::new();

/// Errors surfaced by the runtime binder
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Meeting {0} is already running")]
    AlreadyRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Create(#[from] CreateMeetingError),

    #[error(transparent)]
    Run(#[from] RunMeetingError),
}

struct RunnerHandle {
    runner: Arc<MeetingRunner>,
    join: JoinHandle<()>,
}

/// Process-wide wiring: singleton collaborators plus per-meeting runners
/// and subscriber sets.
pub struct Runtime {
    store: Arc<dyn MeetingStore>,
    gateway: Arc<dyn LlmGateway>,
    bus: Arc<EventBus>,
    transcript: Arc<dyn TranscriptLogger>,
    runners: Mutex<HashMap<String, RunnerHandle>>,
}

impl Runtime {
    pub fn new(store: Arc<dyn MeetingStore>, gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            store,
            gateway,
            bus: Arc::new(EventBus::new()),
            transcript: Arc::new(NoopTranscriptLogger),
            runners: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_transcript(mut self, transcript: Arc<dyn TranscriptLogger>) -> Self {
        self.transcript = transcript;
        self
    }

    /// Install the process-wide runtime. Idempotent: the first install wins
    /// and later calls return the cached instance unchanged.
    pub fn install_global(runtime: Arc<Runtime>) -> Arc<Runtime> {
        GLOBAL.get_or_init(|| runtime).clone()
    }

    pub fn global() -> Option<Arc<Runtime>> {
        GLOBAL.get().cloned()
    }

    pub fn store(&self) -> Arc<dyn MeetingStore> {
        Arc::clone(&self.store)
    }

    /// Validate and create a Draft meeting.
    pub async fn create_meeting(
        &self,
        topic: &str,
        config: MeetingConfig,
    ) -> Result<Meeting, RuntimeError> {
        let use_case = CreateMeetingUseCase::new(Arc::clone(&self.store));
        Ok(use_case.execute(topic, config).await?)
    }

    /// Spawn the orchestrator task for a meeting.
    pub async fn start_meeting(&self, meeting_id: &str) -> Result<(), RuntimeError> {
        // Reject unknown meetings before spawning anything.
        self.store.get_meeting(meeting_id).await?;

        let mut runners = self.runners.lock().expect("runtime poisoned");
        if let Some(handle) = runners.get(meeting_id)
            && !handle.join.is_finished()
        {
            return Err(RuntimeError::AlreadyRunning(meeting_id.to_string()));
        }

        let runner = Arc::new(MeetingRunner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            Arc::clone(&self.bus) as Arc<dyn EventPublisher>,
            Arc::clone(&self.transcript),
            meeting_id,
        ));
        let task_runner = Arc::clone(&runner);
        let task_meeting_id = meeting_id.to_string();
        let join = tokio::spawn(async move {
            if let Err(err) = task_runner.run().await
                && !matches!(err, RunMeetingError::Cancelled)
            {
                warn!(meeting_id = %task_meeting_id, error = %err, "meeting run ended with error");
            }
        });

        runners.insert(meeting_id.to_string(), RunnerHandle { runner, join });
        info!(meeting_id, "meeting runner spawned");
        Ok(())
    }

    /// Route a user message at the meeting's runner.
    ///
    /// Falls back to a detached runner when the meeting is not currently
    /// running, so the message is still appended and announced.
    pub async fn post_user_message(
        &self,
        meeting_id: &str,
        content: &str,
    ) -> Result<Message, RuntimeError> {
        let runner = {
            let runners = self.runners.lock().expect("runtime poisoned");
            runners.get(meeting_id).map(|h| Arc::clone(&h.runner))
        };
        let runner = match runner {
            Some(runner) => runner,
            None => Arc::new(MeetingRunner::new(
                Arc::clone(&self.store),
                Arc::clone(&self.gateway),
                Arc::clone(&self.bus) as Arc<dyn EventPublisher>,
                Arc::clone(&self.transcript),
                meeting_id,
            )),
        };
        Ok(runner.post_user_message(content).await?)
    }

    /// Explicitly abort a meeting and reap its task.
    pub async fn abort_meeting(&self, meeting_id: &str, reason: &str) -> Result<(), RuntimeError> {
        let handle = {
            let mut runners = self.runners.lock().expect("runtime poisoned");
            runners.remove(meeting_id)
        };
        match handle {
            Some(handle) => {
                handle.runner.abort(reason).await?;
                let _ = handle.join.await;
            }
            None => {
                // Not running in this process; still drive it terminal.
                let runner = MeetingRunner::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.gateway),
                    Arc::clone(&self.bus) as Arc<dyn EventPublisher>,
                    Arc::clone(&self.transcript),
                    meeting_id,
                );
                runner.abort(reason).await?;
            }
        }
        Ok(())
    }

    /// Wait for a running meeting's orchestrator task to finish.
    pub async fn wait_for_meeting(&self, meeting_id: &str) -> Result<(), RuntimeError> {
        let handle = {
            let mut runners = self.runners.lock().expect("runtime poisoned");
            runners.remove(meeting_id)
        };
        if let Some(handle) = handle {
            let _ = handle.join.await;
        }
        Ok(())
    }

    /// Subscribe with replay: events after `cursor` come from the log, then
    /// the live stream continues gap-free (duplicates are dropped by id).
    pub async fn subscribe(
        &self,
        meeting_id: &str,
        cursor: Option<u64>,
    ) -> Result<Subscription, RuntimeError> {
        let after = cursor.unwrap_or(0);
        // Attach live first, then fetch the backlog: anything published in
        // between shows up in both and is deduplicated by event id.
        let subscription = self.bus.subscribe(meeting_id, Vec::new(), after);
        let backlog = self.store.list_events(meeting_id, Some(after), None).await?;
        let mut subscription = subscription;
        subscription.preload(backlog);
        Ok(subscription)
    }

    /// Abort everything still running; used on process shutdown.
    pub async fn shutdown(&self, reason: &str) {
        let meeting_ids: Vec<String> = {
            let runners = self.runners.lock().expect("runtime poisoned");
            runners.keys().cloned().collect()
        };
        for meeting_id in meeting_ids {
            if let Err(err) = self.abort_meeting(&meeting_id, reason).await {
                warn!(meeting_id, error = %err, "failed to abort meeting during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{MockProvider, MockStyle};
    use crate::gateway::routing::RoutingGateway;
    use crate::gateway::ProviderAdapter;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use conclave_application::{Completion, GatewayError, GenerateRequest, ResponseFormat};
    use conclave_domain::{
        AgentConfig, DiscussionMode, EventKind, MeetingState, MessageRole, VoteSessionStatus,
    };
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn agents(n: usize, provider: &str) -> Vec<AgentConfig> {
        (0..n)
            .map(|i| AgentConfig::new(format!("agent-{i}"), provider, "mock-default"))
            .collect()
    }

    fn mock_runtime(mock: MockProvider) -> Arc<Runtime> {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(RoutingGateway::new(vec![
            Arc::new(mock) as Arc<dyn ProviderAdapter>
        ]));
        Arc::new(Runtime::new(store, gateway))
    }

    async fn wait_until<F>(runtime: &Runtime, meeting_id: &str, predicate: F)
    where
        F: Fn(&conclave_domain::Meeting) -> bool,
    {
        for _ in 0..500 {
            let meeting = runtime.store().get_meeting(meeting_id).await.unwrap();
            if predicate(&meeting) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached for meeting {meeting_id}");
    }

    /// Scenario: 8 optimists, parallel, accepted on the first vote.
    #[tokio::test]
    async fn eight_agents_parallel_accepted() {
        let runtime = mock_runtime(MockProvider::new().with_default_style(MockStyle::Optimist));
        let mut config = conclave_domain::MeetingConfig::new(agents(8, "mock"));
        config.threshold.min_rounds = 1;

        let meeting = runtime.create_meeting("Rollout plan", config).await.unwrap();
        let mut subscription = runtime.subscribe(&meeting.id, None).await.unwrap();
        runtime.start_meeting(&meeting.id).await.unwrap();
        runtime.wait_for_meeting(&meeting.id).await.unwrap();

        let finished = runtime.store().get_meeting(&meeting.id).await.unwrap();
        assert_eq!(finished.state, MeetingState::FinishedAccepted);
        assert_eq!(finished.effective_discussion_mode, Some(DiscussionMode::ParallelRound));
        let result = finished.result.unwrap();
        assert!(result.accepted);
        assert!(result.report_markdown.contains("# Meeting Report"));

        // Round 0: 8 blind messages appended in agent-config order.
        let messages = runtime
            .store()
            .list_messages(&meeting.id, None, None)
            .await
            .unwrap();
        let round0: Vec<_> = messages
            .iter()
            .filter(|m| m.role == MessageRole::Agent && m.meta.round == 0)
            .collect();
        assert_eq!(round0.len(), 8);
        for (i, message) in round0.iter().enumerate() {
            assert_eq!(message.agent_id.as_deref(), Some(format!("agent-{i}").as_str()));
            assert_eq!(message.meta.turn_index, Some(i as u32));
            assert!(message.meta.reply_targets.is_empty());
        }

        // The event stream saw the acceptance.
        let events = subscription.drain_ready();
        assert!(events.iter().any(|e| {
            e.kind() == EventKind::VoteSessionFinal && e.body.payload["accepted"] == true
        }));
    }

    /// Provider that always times out; used to exercise the mock fallback.
    struct TimingOutAdapter;

    #[async_trait]
    impl ProviderAdapter for TimingOutAdapter {
        fn id(&self) -> &str {
            "openai"
        }

        async fn generate(
            &self,
            request: &GenerateRequest,
            _cancel: &CancellationToken,
        ) -> Result<Completion, GatewayError> {
            Err(GatewayError::Timeout(request.timeout.as_millis() as u64))
        }
    }

    /// Scenario: provider timeout, mock fallback records provenance.
    #[tokio::test]
    async fn timeout_falls_back_to_mock_with_provenance() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(RoutingGateway::new(vec![
            Arc::new(TimingOutAdapter) as Arc<dyn ProviderAdapter>,
            Arc::new(MockProvider::new()) as Arc<dyn ProviderAdapter>,
        ]));
        let runtime = Arc::new(Runtime::new(store, gateway));

        let mut config = conclave_domain::MeetingConfig::new(agents(3, "openai"));
        config.threshold.min_rounds = 1;
        config.threshold.max_rounds = 1;
        config.facilitator.enabled = false;

        let meeting = runtime.create_meeting("Timeout drill", config).await.unwrap();
        runtime.start_meeting(&meeting.id).await.unwrap();
        runtime.wait_for_meeting(&meeting.id).await.unwrap();

        let messages = runtime
            .store()
            .list_messages(&meeting.id, None, None)
            .await
            .unwrap();
        let agent_messages: Vec<_> = messages.iter().filter(|m| m.role == MessageRole::Agent).collect();
        assert!(!agent_messages.is_empty());
        assert!(agent_messages
            .iter()
            .all(|m| m.meta.provider_request_id.as_deref() == Some("fallback:openai->mock")));

        // Neutral mock votes keep the score at 75, so the meeting runs out
        // of rounds.
        let finished = runtime.store().get_meeting(&meeting.id).await.unwrap();
        assert_eq!(finished.state, MeetingState::FinishedAborted);
        assert_eq!(finished.result.unwrap().reason, "Max rounds reached");
    }

    /// Vote calls hang until cancelled; discussion and the rest are instant.
    struct SlowVoteGateway {
        inner: MockProvider,
    }

    #[async_trait]
    impl conclave_application::LlmGateway for SlowVoteGateway {
        async fn generate_text(
            &self,
            request: GenerateRequest,
            cancel: &CancellationToken,
        ) -> Result<Completion, GatewayError> {
            let system = request
                .messages
                .first()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let is_vote = request.response_format == ResponseFormat::JsonObject
                && !system.contains("neutral facilitator");
            if is_vote {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                }
            }
            self.inner.generate(&request, cancel).await
        }
    }

    /// Scenario: user interrupt mid-vote aborts the session and drops votes.
    #[tokio::test]
    async fn user_interrupt_aborts_vote_session() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(SlowVoteGateway {
            inner: MockProvider::new().with_default_style(MockStyle::Optimist),
        });
        let runtime = Arc::new(Runtime::new(store, gateway));

        let mut config = conclave_domain::MeetingConfig::new(agents(6, "mock"));
        config.threshold.min_rounds = 1;
        config.facilitator.enabled = false;

        let meeting = runtime.create_meeting("Budget plan", config).await.unwrap();
        runtime.start_meeting(&meeting.id).await.unwrap();

        wait_until(&runtime, &meeting.id, |m| m.state == MeetingState::RunningVote).await;
        let during_vote = runtime.store().get_meeting(&meeting.id).await.unwrap();
        let session_id = during_vote.active_vote_session_id.clone().unwrap();
        let stage_before = during_vote.stage_version;

        runtime
            .post_user_message(&meeting.id, "stop, consider budget")
            .await
            .unwrap();

        // The runner may already be in a later round; assert on the durable
        // record of the interrupt instead of the instantaneous state.
        let session = runtime
            .store()
            .get_vote_session(&meeting.id, &session_id)
            .await
            .unwrap();
        assert_eq!(session.status, VoteSessionStatus::Aborted);

        let events = runtime
            .store()
            .list_events(&meeting.id, None, None)
            .await
            .unwrap();
        assert!(events.iter().any(|e| {
            e.kind() == EventKind::MeetingStateChanged
                && e.body.payload["state"] == "running_discussion"
                && e.body.payload["stage_version"] == stage_before + 1
        }));

        // Every in-flight vote was cancelled or dropped stale.
        let votes = runtime
            .store()
            .list_votes(&meeting.id, Some(&session_id))
            .await
            .unwrap();
        assert!(votes.is_empty());

        // The user message is in the transcript for the next round.
        let messages = runtime.store().list_messages(&meeting.id, None, None).await.unwrap();
        assert!(messages
            .iter()
            .any(|m| m.role == MessageRole::User && m.content.contains("consider budget")));

        runtime.abort_meeting(&meeting.id, "test over").await.unwrap();
        let finished = runtime.store().get_meeting(&meeting.id).await.unwrap();
        assert!(finished.state.is_terminal());
    }

    /// Scenario: facilitator JSON broken three times; round continues
    /// without a facilitator message.
    #[tokio::test]
    async fn broken_facilitator_is_skipped() {
        let runtime = mock_runtime(MockProvider::new().with_broken_facilitator());
        let mut config = conclave_domain::MeetingConfig::new(agents(3, "mock"));
        config.threshold.min_rounds = 2;
        config.threshold.max_rounds = 2;

        let meeting = runtime.create_meeting("t", config).await.unwrap();
        runtime.start_meeting(&meeting.id).await.unwrap();
        runtime.wait_for_meeting(&meeting.id).await.unwrap();

        let messages = runtime.store().list_messages(&meeting.id, None, None).await.unwrap();
        assert!(messages.iter().all(|m| m.role != MessageRole::System));
        // Discussion still happened in every round.
        for round in 0..=2 {
            assert!(messages
                .iter()
                .any(|m| m.role == MessageRole::Agent && m.meta.round == round));
        }
    }

    /// Replay after a cursor plus live delivery forms a gap-free prefix.
    #[tokio::test]
    async fn replay_from_cursor_is_gap_free() {
        let runtime = mock_runtime(MockProvider::new().with_default_style(MockStyle::Optimist));
        let mut config = conclave_domain::MeetingConfig::new(agents(3, "mock"));
        config.threshold.min_rounds = 1;
        config.facilitator.enabled = false;

        let meeting = runtime.create_meeting("t", config).await.unwrap();
        runtime.start_meeting(&meeting.id).await.unwrap();
        runtime.wait_for_meeting(&meeting.id).await.unwrap();

        let log = runtime.store().list_events(&meeting.id, None, None).await.unwrap();
        assert!(log.len() > 4);
        let cursor = log[log.len() / 2].id;

        let mut subscription = runtime.subscribe(&meeting.id, Some(cursor)).await.unwrap();
        let replayed = subscription.drain_ready();
        let expected: Vec<u64> = log.iter().filter(|e| e.id > cursor).map(|e| e.id).collect();
        assert_eq!(replayed.iter().map(|e| e.id).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn start_meeting_twice_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(SlowVoteGateway {
            inner: MockProvider::new().with_default_style(MockStyle::Optimist),
        });
        let runtime = Arc::new(Runtime::new(store, gateway));
        let mut config = conclave_domain::MeetingConfig::new(agents(3, "mock"));
        config.threshold.min_rounds = 1;

        let meeting = runtime.create_meeting("t", config).await.unwrap();
        runtime.start_meeting(&meeting.id).await.unwrap();
        let err = runtime.start_meeting(&meeting.id).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyRunning(_)));
        runtime.abort_meeting(&meeting.id, "done").await.unwrap();
    }

    #[tokio::test]
    async fn create_meeting_rejects_bad_config() {
        let runtime = mock_runtime(MockProvider::new());
        let err = runtime
            .create_meeting("t", conclave_domain::MeetingConfig::new(agents(2, "mock")))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Create(_)));
    }
}
