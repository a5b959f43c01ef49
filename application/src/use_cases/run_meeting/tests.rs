//! Orchestrator state-machine tests against a scripted gateway.

use super::*;
use crate::ports::llm_gateway::{Completion, GatewayError, GenerateRequest, ResponseFormat};
use crate::ports::store::tests_support::StubStore;
use crate::ports::transcript::NoopTranscriptLogger;
use async_trait::async_trait;
use conclave_domain::{AgentConfig, EventKind, MeetingConfig, MeetingEvent, MeetingState};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Collects published events for assertions.
#[derive(Default)]
struct CapturingPublisher {
    events: Mutex<Vec<MeetingEvent>>,
}

impl EventPublisher for CapturingPublisher {
    fn publish(&self, event: &MeetingEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Gateway scripted by inspecting the request's system prompt.
struct FakeGateway {
    /// Per-agent proposal vote score; default 75.
    scores: HashMap<String, u32>,
    /// Agents that reject every final-document approval.
    rejectors: Vec<String>,
    /// Agents whose discussion calls fail with a non-recoverable error.
    broken_agents: Vec<String>,
}

impl FakeGateway {
    fn new() -> Self {
        Self { scores: HashMap::new(), rejectors: Vec::new(), broken_agents: Vec::new() }
    }

    fn with_score(mut self, agent_id: &str, score: u32) -> Self {
        self.scores.insert(agent_id.to_string(), score);
        self
    }

    fn with_rejector(mut self, agent_id: &str) -> Self {
        self.rejectors.push(agent_id.to_string());
        self
    }

    fn agent_of(request: &GenerateRequest) -> String {
        request
            .metadata
            .as_ref()
            .and_then(|m| m.get("agent_id"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

#[async_trait]
impl LlmGateway for FakeGateway {
    async fn generate_text(
        &self,
        request: GenerateRequest,
        _cancel: &CancellationToken,
    ) -> Result<Completion, GatewayError> {
        let system = request
            .messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let agent_id = Self::agent_of(&request);

        let text = if request.response_format == ResponseFormat::JsonObject {
            if system.contains("neutral facilitator") {
                r#"{"round_summary": "agents are converging", "disagreements": ["pace"],
                    "proposed_patch": "phase the rollout", "next_focus": ["budget"]}"#
                    .to_string()
            } else if system.contains("reviewing the final result document") {
                let pass = !self.rejectors.contains(&agent_id);
                let score = if pass { 92 } else { 40 };
                format!(
                    r#"{{"score": {score}, "pass": {pass}, "rationale": "review by {agent_id}"}}"#
                )
            } else {
                let score = self.scores.get(&agent_id).copied().unwrap_or(75);
                format!(
                    r#"{{"score": {score}, "pass": {}, "rationale": "vote by {agent_id}"}}"#,
                    score >= 80
                )
            }
        } else if system.contains("editor producing the final result") {
            "# Decision\nShip the phased rollout.\n## Acceptance Criteria\nAll checks green."
                .to_string()
        } else {
            if self.broken_agents.contains(&agent_id) {
                return Err(GatewayError::Auth(format!("agent {agent_id} has no credentials")));
            }
            format!("Contribution from {agent_id} in round {}", {
                request
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("round"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
            })
        };

        Ok(Completion { text, usage: None, request_id: None })
    }
}

fn config(agents: &[&str]) -> MeetingConfig {
    MeetingConfig::new(
        agents
            .iter()
            .map(|id| AgentConfig::new(*id, "mock", "mock-default"))
            .collect(),
    )
}

struct Harness {
    store: Arc<StubStore>,
    publisher: Arc<CapturingPublisher>,
    runner: MeetingRunner,
    meeting_id: String,
}

async fn harness(gateway: FakeGateway, config: MeetingConfig, topic: &str) -> Harness {
    let store = Arc::new(StubStore::default());
    let publisher = Arc::new(CapturingPublisher::default());
    let meeting = conclave_domain::Meeting::new(topic, config, Utc::now()).unwrap();
    let meeting = store.create_meeting(meeting).await.unwrap();
    let runner = MeetingRunner::new(
        Arc::clone(&store) as Arc<dyn MeetingStore>,
        Arc::new(gateway),
        Arc::clone(&publisher) as Arc<dyn EventPublisher>,
        Arc::new(NoopTranscriptLogger),
        meeting.id.clone(),
    );
    Harness { store, publisher, meeting_id: meeting.id, runner }
}

fn state_changes(events: &[MeetingEvent]) -> Vec<(String, u64)> {
    events
        .iter()
        .filter(|e| e.kind() == EventKind::MeetingStateChanged)
        .map(|e| {
            (
                e.body.payload["state"].as_str().unwrap().to_string(),
                e.body.payload["stage_version"].as_u64().unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn happy_path_reaches_accepted() {
    let gateway = FakeGateway::new()
        .with_score("a", 90)
        .with_score("b", 85)
        .with_score("c", 95);
    let h = harness(gateway, config(&["a", "b", "c"]), "Rollout plan").await;

    h.runner.run().await.unwrap();

    let meeting = h.store.get_meeting(&h.meeting_id).await.unwrap();
    assert_eq!(meeting.state, MeetingState::FinishedAccepted);
    let result = meeting.result.expect("terminal meeting must carry a result");
    assert!(result.accepted);
    assert!(result.summary_json["final_document_markdown"]
        .as_str()
        .unwrap()
        .contains("# Decision"));
    assert_eq!(result.summary_json["approvals"].as_array().unwrap().len(), 3);
    assert!(meeting.active_vote_session_id.is_none());

    // One proposal session finalized, one approval session finalized.
    let events = h.publisher.events.lock().unwrap().clone();
    let finals: Vec<_> = events
        .iter()
        .filter(|e| e.kind() == EventKind::VoteSessionFinal)
        .collect();
    assert_eq!(finals.len(), 2);
    assert_eq!(finals[0].body.payload["kind"], "proposal");
    assert_eq!(finals[1].body.payload["kind"], "approval");
    assert_eq!(finals[1].body.payload["accepted"], true);
}

#[tokio::test]
async fn stage_version_is_monotone_across_state_changes() {
    let gateway = FakeGateway::new().with_score("a", 90).with_score("b", 90).with_score("c", 90);
    let h = harness(gateway, config(&["a", "b", "c"]), "t").await;
    h.runner.run().await.unwrap();

    let events = h.publisher.events.lock().unwrap().clone();
    let changes = state_changes(&events);
    assert!(!changes.is_empty());
    let versions: Vec<u64> = changes.iter().map(|(_, sv)| *sv).collect();
    let mut sorted = versions.clone();
    sorted.sort_unstable();
    assert_eq!(versions, sorted, "stage_version regressed: {changes:?}");
    // Strictly increasing: every transition lifts the stage.
    for pair in versions.windows(2) {
        assert!(pair[0] < pair[1], "stage_version did not strictly increase: {changes:?}");
    }
}

#[tokio::test]
async fn below_threshold_meetings_abort_at_max_rounds() {
    // All neutral voters (75 < 80), so no session ever accepts.
    let mut config = config(&["a", "b", "c", "d", "e"]);
    config.threshold.max_rounds = 3;
    let h = harness(FakeGateway::new(), config, "Rollout plan").await;

    h.runner.run().await.unwrap();

    let meeting = h.store.get_meeting(&h.meeting_id).await.unwrap();
    assert_eq!(meeting.state, MeetingState::FinishedAborted);
    let result = meeting.result.unwrap();
    assert!(!result.accepted);
    assert_eq!(result.reason, "Max rounds reached");

    // Rounds 2 and 3 voted (min_rounds default 2) and both rejected.
    let events = h.publisher.events.lock().unwrap().clone();
    let finals: Vec<_> = events
        .iter()
        .filter(|e| e.kind() == EventKind::VoteSessionFinal)
        .collect();
    assert_eq!(finals.len(), 2);
    assert!(finals.iter().all(|e| e.body.payload["accepted"] == false));
    assert!(finals.iter().all(|e| e.body.payload["avg_score"] == 75));
}

#[tokio::test]
async fn no_vote_session_before_min_rounds() {
    let gateway = FakeGateway::new().with_score("a", 90).with_score("b", 90).with_score("c", 90);
    let h = harness(gateway, config(&["a", "b", "c"]), "t").await;
    h.runner.run().await.unwrap();

    let events = h.publisher.events.lock().unwrap().clone();
    let first_session = events
        .iter()
        .find(|e| e.kind() == EventKind::VoteSessionStarted)
        .expect("a vote session must eventually start");
    // min_rounds defaults to 2: rounds 0 and 1 never vote.
    let messages_before: Vec<_> = events
        .iter()
        .take_while(|e| e.id < first_session.id)
        .filter(|e| e.kind() == EventKind::MessageFinal)
        .collect();
    let max_round = messages_before
        .iter()
        .filter_map(|e| e.body.payload["message"]["meta"]["round"].as_u64())
        .max()
        .unwrap();
    assert_eq!(max_round, 2);
}

#[tokio::test]
async fn persistent_dissent_aborts_after_three_approval_attempts() {
    let gateway = FakeGateway::new()
        .with_score("a", 90)
        .with_score("b", 90)
        .with_score("c", 90)
        .with_rejector("c");
    let h = harness(gateway, config(&["a", "b", "c"]), "t").await;

    h.runner.run().await.unwrap();

    let meeting = h.store.get_meeting(&h.meeting_id).await.unwrap();
    assert_eq!(meeting.state, MeetingState::FinishedAborted);
    let result = meeting.result.unwrap();
    assert_eq!(
        result.reason,
        "Final result document was not approved by all agents after 3 attempt(s)"
    );
    // The last draft survives in the summary.
    assert!(result.summary_json["final_document_markdown"].as_str().is_some());

    let events = h.publisher.events.lock().unwrap().clone();
    let approvals: Vec<_> = events
        .iter()
        .filter(|e| e.kind() == EventKind::VoteSessionStarted)
        .filter(|e| e.body.payload["kind"] == "approval")
        .collect();
    assert_eq!(approvals.len(), 3);
    assert_eq!(approvals[2].body.payload["attempt"], 3);
}

#[tokio::test]
async fn all_agents_broken_aborts_after_two_empty_rounds() {
    let mut gateway = FakeGateway::new();
    gateway.broken_agents = vec!["a".into(), "b".into(), "c".into()];
    let mut config = config(&["a", "b", "c"]);
    config.facilitator.enabled = false;
    let h = harness(gateway, config, "t").await;

    h.runner.run().await.unwrap();

    let meeting = h.store.get_meeting(&h.meeting_id).await.unwrap();
    assert_eq!(meeting.state, MeetingState::FinishedAborted);
    assert_eq!(
        meeting.result.unwrap().reason,
        "No agent produced a message for 2 consecutive rounds"
    );

    let events = h.publisher.events.lock().unwrap().clone();
    let skip_events = events
        .iter()
        .filter(|e| e.kind() == EventKind::Error)
        .filter(|e| e.body.payload["code"] == error_codes::DISCUSSION_EMPTY_SKIP_VOTE)
        .count();
    assert_eq!(skip_events, 2);
    let agent_errors = events
        .iter()
        .filter(|e| e.kind() == EventKind::Error)
        .filter(|e| e.body.payload["code"] == error_codes::AGENT_ERROR)
        .count();
    // 3 agents failing in each of 2 rounds.
    assert_eq!(agent_errors, 6);
}

#[tokio::test]
async fn agent_messages_per_round_never_exceed_enabled_agents() {
    let gateway = FakeGateway::new().with_score("a", 90).with_score("b", 90).with_score("c", 90);
    let h = harness(gateway, config(&["a", "b", "c"]), "t").await;
    h.runner.run().await.unwrap();

    let messages = h.store.list_messages(&h.meeting_id, None, None).await.unwrap();
    let mut per_round: HashMap<u32, usize> = HashMap::new();
    for message in messages.iter().filter(|m| m.role == MessageRole::Agent) {
        *per_round.entry(message.meta.round).or_default() += 1;
    }
    assert!(per_round.values().all(|&n| n <= 3), "per-round counts: {per_round:?}");
}

#[tokio::test]
async fn user_message_in_discussion_is_appended_without_stage_bump() {
    let h = harness(FakeGateway::new(), config(&["a", "b", "c"]), "t").await;
    // Move the meeting out of Draft first.
    h.runner.start_meeting().await.unwrap();
    let before = h.store.get_meeting(&h.meeting_id).await.unwrap();

    h.runner.post_user_message("please consider the budget").await.unwrap();

    let after = h.store.get_meeting(&h.meeting_id).await.unwrap();
    assert_eq!(after.stage_version, before.stage_version);
    assert_eq!(after.state, MeetingState::RunningDiscussion);
    let messages = h.store.list_messages(&h.meeting_id, None, None).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::User);
}

#[tokio::test]
async fn round_zero_messages_carry_no_reply_targets() {
    let gateway = FakeGateway::new().with_score("a", 90).with_score("b", 90).with_score("c", 90);
    let h = harness(gateway, config(&["a", "b", "c"]), "t").await;
    h.runner.run().await.unwrap();

    let messages = h.store.list_messages(&h.meeting_id, None, None).await.unwrap();
    let round0: Vec<_> = messages
        .iter()
        .filter(|m| m.role == MessageRole::Agent && m.meta.round == 0)
        .collect();
    assert_eq!(round0.len(), 3);
    assert!(round0.iter().all(|m| m.meta.reply_targets.is_empty()));

    let later: Vec<_> = messages
        .iter()
        .filter(|m| m.role == MessageRole::Agent && m.meta.round > 0)
        .collect();
    assert!(later.iter().all(|m| !m.meta.reply_targets.is_empty()));
}
