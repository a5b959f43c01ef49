//! Discussion rounds.
//!
//! Round 0 is blind: every enabled agent is prompted in parallel with only
//! the topic, even under serial mode. Later rounds run in the meeting's
//! effective mode. A failing agent never halts a round; its absence is an
//! `AGENT_ERROR` event.

use super::{MeetingRunner, RunMeetingError, DISCUSSION_TIMEOUT_FLOOR_MS};
use crate::ports::llm_gateway::{ChatMessage, GenerateRequest, ResponseFormat};
use crate::use_cases::shared::{check_cancelled, generate_with_fallback};
use chrono::Utc;
use conclave_domain::{
    error_codes, AgentConfig, DiscussionMode, DiscussionPromptContext, EventBody, Meeting, Message,
    MessageMeta, MessageRole, PromptBuilder, ReplyTarget, select_reply_targets,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

impl MeetingRunner {
    /// Run one discussion round; returns how many agent messages landed.
    pub(crate) async fn run_discussion_round(
        &self,
        meeting: &Meeting,
        round: u32,
    ) -> Result<usize, RunMeetingError> {
        let mode = if round == 0 {
            // Blind round: parallel regardless of the effective mode.
            DiscussionMode::ParallelRound
        } else {
            meeting
                .effective_discussion_mode
                .unwrap_or(DiscussionMode::SerialTurn)
        };

        debug!(meeting_id = %self.meeting_id, round, %mode, "running discussion round");
        match mode {
            DiscussionMode::SerialTurn => self.run_serial_round(meeting, round).await,
            DiscussionMode::ParallelRound => self.run_parallel_round(meeting, round).await,
        }
    }

    /// Serial turns: each agent sees every message appended before its turn.
    async fn run_serial_round(&self, meeting: &Meeting, round: u32) -> Result<usize, RunMeetingError> {
        let agents: Vec<AgentConfig> = meeting.config.enabled_agents().into_iter().cloned().collect();
        let mut produced = 0usize;

        for (turn_index, agent) in agents.iter().enumerate() {
            check_cancelled(&self.meeting_cancel)?;

            let messages = self.store.list_messages(&self.meeting_id, None, None).await?;
            let reply_targets = self.targets_for(meeting, &agent.id, round, &messages);
            let request = self.discussion_request(meeting, agent, round, &messages, &reply_targets);

            let started = Instant::now();
            match generate_with_fallback(self.gateway.as_ref(), request, &self.meeting_cancel).await {
                Ok(completion) => {
                    check_cancelled(&self.meeting_cancel)?;
                    let meta = MessageMeta {
                        round,
                        turn_index: Some(turn_index as u32),
                        discussion_mode: meeting.effective_discussion_mode,
                        reply_targets,
                        usage: completion.usage,
                        latency_ms: Some(started.elapsed().as_millis() as u64),
                        provider_request_id: completion.request_id,
                    };
                    let message =
                        Message::agent(&self.meeting_id, &agent.id, completion.text, meta, Utc::now());
                    let message = self.store.append_message(message).await?;
                    self.emit(EventBody::message_final(&message, Utc::now())).await?;
                    produced += 1;
                }
                Err(err) if err.is_cancelled() => return Err(RunMeetingError::Cancelled),
                Err(err) => {
                    warn!(agent_id = %agent.id, round, error = %err, "agent discussion call failed");
                    self.emit(EventBody::error(
                        &self.meeting_id,
                        error_codes::AGENT_ERROR,
                        &format!("agent {} failed: {err}", agent.id),
                        Some(json!({ "agent_id": agent.id, "round": round })),
                        Utc::now(),
                    ))
                    .await?;
                }
            }
        }

        Ok(produced)
    }

    /// Parallel round: all calls run against one message snapshot. Results
    /// are dropped wholesale when the stage version moved while they were in
    /// flight, and otherwise appended in agent-config order.
    async fn run_parallel_round(&self, meeting: &Meeting, round: u32) -> Result<usize, RunMeetingError> {
        let snapshot = self.store.list_messages(&self.meeting_id, None, None).await?;
        let snapshot_version = self.store.get_meeting(&self.meeting_id).await?.stage_version;
        let agents: Vec<AgentConfig> = meeting.config.enabled_agents().into_iter().cloned().collect();

        let mut join_set = JoinSet::new();
        for (turn_index, agent) in agents.iter().enumerate() {
            let reply_targets = self.targets_for(meeting, &agent.id, round, &snapshot);
            let request = self.discussion_request(meeting, agent, round, &snapshot, &reply_targets);
            let gateway = std::sync::Arc::clone(&self.gateway);
            let cancel = self.meeting_cancel.clone();
            let agent_id = agent.id.clone();

            join_set.spawn(async move {
                let started = Instant::now();
                let result = generate_with_fallback(gateway.as_ref(), request, &cancel).await;
                (turn_index, agent_id, reply_targets, result, started.elapsed())
            });
        }

        type AgentResult = (
            usize,
            String,
            Vec<ReplyTarget>,
            Result<crate::ports::llm_gateway::Completion, crate::ports::llm_gateway::GatewayError>,
            Duration,
        );
        let mut settled: Vec<AgentResult> = Vec::with_capacity(agents.len());

        loop {
            let joined = tokio::select! {
                biased;
                _ = self.meeting_cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(RunMeetingError::Cancelled);
                }
                joined = join_set.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            match joined {
                Ok(result) => settled.push(result),
                Err(err) => warn!(round, error = %err, "discussion task join error"),
            }
        }

        // A stage bump while calls were in flight invalidates the whole round.
        let current = self.store.get_meeting(&self.meeting_id).await?;
        if current.stage_version != snapshot_version {
            debug!(
                meeting_id = %self.meeting_id,
                round,
                "stage version moved during parallel round, dropping results"
            );
            return Ok(0);
        }

        settled.sort_by_key(|(turn_index, ..)| *turn_index);

        let mut produced = 0usize;
        for (turn_index, agent_id, reply_targets, result, latency) in settled {
            match result {
                Ok(completion) => {
                    let meta = MessageMeta {
                        round,
                        turn_index: Some(turn_index as u32),
                        discussion_mode: meeting.effective_discussion_mode,
                        reply_targets,
                        usage: completion.usage,
                        latency_ms: Some(latency.as_millis() as u64),
                        provider_request_id: completion.request_id,
                    };
                    let message =
                        Message::agent(&self.meeting_id, &agent_id, completion.text, meta, Utc::now());
                    let message = self.store.append_message(message).await?;
                    self.emit(EventBody::message_final(&message, Utc::now())).await?;
                    produced += 1;
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    warn!(agent_id = %agent_id, round, error = %err, "agent discussion call failed");
                    self.emit(EventBody::error(
                        &self.meeting_id,
                        error_codes::AGENT_ERROR,
                        &format!("agent {agent_id} failed: {err}"),
                        Some(json!({ "agent_id": agent_id, "round": round })),
                        Utc::now(),
                    ))
                    .await?;
                }
            }
        }

        Ok(produced)
    }

    /// Reply targets for one agent; empty in the blind round.
    fn targets_for(
        &self,
        meeting: &Meeting,
        agent_id: &str,
        round: u32,
        messages: &[Message],
    ) -> Vec<ReplyTarget> {
        if round == 0 {
            return Vec::new();
        }
        select_reply_targets(
            agent_id,
            messages,
            meeting.config.discussion.cross_reply_targets_per_agent,
        )
    }

    /// Build one agent's discussion request from a transcript view.
    fn discussion_request(
        &self,
        meeting: &Meeting,
        agent: &AgentConfig,
        round: u32,
        messages: &[Message],
        reply_targets: &[ReplyTarget],
    ) -> GenerateRequest {
        let rolling = self.rolling_summary_for(meeting, messages);
        // User guidance from this and the prior round.
        let user_messages: Vec<Message> = messages
            .iter()
            .filter(|m| m.role == MessageRole::User && m.meta.round + 1 >= round)
            .cloned()
            .collect();

        let prompt = PromptBuilder::discussion_prompt(&DiscussionPromptContext {
            topic: &meeting.topic,
            round,
            rolling_summary: rolling.as_deref(),
            rolling_summary_max_chars: meeting.config.discussion.rolling_summary_max_chars,
            recent_messages: messages,
            user_messages: &user_messages,
            reply_targets,
        });

        let mut request = GenerateRequest::new(&agent.provider, &agent.model);
        if !agent.system_prompt.trim().is_empty() {
            request.messages.push(ChatMessage::system(&agent.system_prompt));
        }
        request.messages.push(ChatMessage::user(prompt));
        request.temperature = agent.temperature;
        request.max_output_tokens = agent.max_output_tokens;
        request.timeout = Duration::from_millis(
            DISCUSSION_TIMEOUT_FLOOR_MS.max(meeting.config.threshold.vote_timeout_ms),
        );
        request.response_format = ResponseFormat::Text;
        request.metadata = Some(json!({ "agent_id": agent.id, "round": round }));
        request
    }
}
