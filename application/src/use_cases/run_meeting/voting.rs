//! Vote sessions (Phase 1 of the vote stage).
//!
//! A session is created at a recorded stage version `V`; every vote that
//! comes back re-reads the meeting and is dropped unless the stage version
//! still equals `V`. Evaluation and finalization also re-check `V`, so a
//! user interrupt between dispatch and persist can never contaminate a later
//! stage. This optimistic check is the concurrency mechanism; the meeting
//! lock is held only for the transitions themselves.

use super::{MeetingRunner, RunMeetingError, VOTE_TIMEOUT_FLOOR_MS};
use crate::ports::llm_gateway::{ChatMessage, GenerateRequest, ResponseFormat};
use crate::use_cases::shared::generate_with_fallback;
use chrono::Utc;
use conclave_domain::meeting::entities::MeetingPatch;
use conclave_domain::{
    evaluate_threshold, parse_vote_response, EventBody, Meeting, MeetingState, MessageRole,
    PromptBuilder, Vote, VoteAggregate, VoteSession, VoteSessionKind, VoteSessionStatus,
};
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one proposal vote stage.
#[derive(Debug)]
pub enum VoteOutcome {
    /// Threshold met; the final-document phase decides acceptance.
    Accepted { proposal_text: String },
    /// Threshold not met; discussion continues.
    Rejected,
    /// A user interrupt lifted the stage version; the session was aborted.
    Interrupted,
}

impl MeetingRunner {
    /// Run the proposal vote over the round that just completed.
    pub(crate) async fn run_vote_stage(
        &self,
        meeting: &Meeting,
        round: u32,
    ) -> Result<VoteOutcome, RunMeetingError> {
        // Enter the vote stage under the lock.
        let (session, vote_token) = {
            let _lock = self.store.lock_meeting(&self.meeting_id).await?;
            let current = self.store.get_meeting(&self.meeting_id).await?;
            if current.state != MeetingState::RunningDiscussion {
                return Ok(VoteOutcome::Interrupted);
            }

            let messages = self.store.list_messages(&self.meeting_id, None, None).await?;
            let round_messages: Vec<_> = messages
                .iter()
                .filter(|m| m.role == MessageRole::Agent && m.meta.round == round)
                .cloned()
                .collect();
            let proposal_text = PromptBuilder::build_proposal_text(&round_messages);

            let stage_version = current.stage_version + 1;
            let expected: Vec<String> = current
                .config
                .enabled_agents()
                .iter()
                .map(|a| a.id.clone())
                .collect();
            let session = self
                .store
                .create_vote_session(VoteSession::start(
                    &self.meeting_id,
                    round,
                    stage_version,
                    proposal_text,
                    VoteSessionKind::Proposal,
                    expected,
                    Utc::now(),
                ))
                .await?;

            let updated = self
                .store
                .update_meeting(
                    &self.meeting_id,
                    MeetingPatch {
                        state: Some(MeetingState::RunningVote),
                        stage_version: Some(stage_version),
                        active_vote_session_id: Some(Some(session.id.clone())),
                        ..Default::default()
                    },
                )
                .await?;
            self.emit(EventBody::state_changed(&updated, Utc::now())).await?;
            self.emit(EventBody::vote_session_started(&session, Utc::now())).await?;
            info!(
                meeting_id = %self.meeting_id,
                round,
                stage_version,
                "vote session started"
            );

            (session, self.rotate_vote_cancel())
        };

        self.collect_votes(meeting, &session, &vote_token).await?;

        // All calls settled; evaluate only if the stage survived.
        let current = self.store.get_meeting(&self.meeting_id).await?;
        if current.stage_version != session.stage_version {
            debug!(meeting_id = %self.meeting_id, "vote session overtaken by interrupt");
            return Ok(VoteOutcome::Interrupted);
        }

        let votes = self.store.list_votes(&self.meeting_id, Some(&session.id)).await?;
        let aggregate = VoteAggregate::from_votes(&votes);
        let decision = evaluate_threshold(&current.config.threshold, round, &aggregate);

        let _lock = self.store.lock_meeting(&self.meeting_id).await?;
        let current = self.store.get_meeting(&self.meeting_id).await?;
        if current.stage_version != session.stage_version {
            return Ok(VoteOutcome::Interrupted);
        }

        self.store
            .finalize_vote_session(
                &self.meeting_id,
                &session.id,
                VoteSessionStatus::Finalized,
                Utc::now(),
            )
            .await?;
        self.emit(EventBody::vote_session_final(
            &self.meeting_id,
            &session.id,
            session.stage_version,
            decision.accepted,
            decision.avg_score,
            &decision.reason,
            VoteSessionKind::Proposal,
            Utc::now(),
        ))
        .await?;
        info!(
            meeting_id = %self.meeting_id,
            accepted = decision.accepted,
            avg_score = decision.avg_score,
            votes = aggregate.count,
            "vote session finalized"
        );

        if decision.accepted {
            self.store
                .update_meeting(
                    &self.meeting_id,
                    MeetingPatch {
                        active_vote_session_id: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
            Ok(VoteOutcome::Accepted { proposal_text: session.proposal_text })
        } else {
            let updated = self
                .store
                .update_meeting(
                    &self.meeting_id,
                    MeetingPatch {
                        state: Some(MeetingState::RunningDiscussion),
                        stage_version: Some(session.stage_version + 1),
                        active_vote_session_id: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
            self.emit(EventBody::state_changed(&updated, Utc::now())).await?;
            Ok(VoteOutcome::Rejected)
        }
    }

    /// Dispatch one vote call per enabled agent and persist the survivors.
    ///
    /// Used by both the proposal vote and the final-document approval; the
    /// session kind selects the prompt. Individual failures lose that
    /// agent's vote; the aggregation simply excludes it.
    pub(crate) async fn collect_votes(
        &self,
        meeting: &Meeting,
        session: &VoteSession,
        vote_token: &CancellationToken,
    ) -> Result<(), RunMeetingError> {
        let messages = self.store.list_messages(&self.meeting_id, None, None).await?;
        let rolling = self.rolling_summary_for(meeting, &messages);
        let timeout = Duration::from_millis(
            VOTE_TIMEOUT_FLOOR_MS.max(meeting.config.threshold.vote_timeout_ms),
        );

        let mut join_set = JoinSet::new();
        for agent in meeting.config.enabled_agents() {
            let (system, user) = match session.kind {
                VoteSessionKind::Proposal => (
                    PromptBuilder::vote_system(&agent.system_prompt),
                    PromptBuilder::vote_prompt(
                        &meeting.topic,
                        rolling.as_deref(),
                        &session.proposal_text,
                    ),
                ),
                VoteSessionKind::Approval => (
                    PromptBuilder::approval_system(&agent.system_prompt),
                    PromptBuilder::approval_prompt(&meeting.topic, &session.proposal_text),
                ),
            };

            let mut request = GenerateRequest::new(&agent.provider, &agent.model);
            request.messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
            request.temperature = 0.1;
            request.max_output_tokens = 512;
            request.timeout = timeout;
            request.response_format = ResponseFormat::JsonObject;
            request.metadata = Some(json!({ "agent_id": agent.id, "vote_session_id": session.id }));

            let gateway = std::sync::Arc::clone(&self.gateway);
            let token = vote_token.clone();
            let agent_id = agent.id.clone();
            join_set.spawn(async move {
                let result = generate_with_fallback(gateway.as_ref(), request, &token).await;
                (agent_id, result)
            });
        }

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

            let (agent_id, result) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "vote task join error");
                    continue;
                }
            };

            match result {
                Ok(completion) => {
                    let parsed = parse_vote_response(&completion.text);

                    // The stage-version drop rule: persist only while the
                    // meeting is still at the session's stage.
                    let current = self.store.get_meeting(&self.meeting_id).await?;
                    if current.stage_version != session.stage_version {
                        debug!(agent_id, "dropping stale vote");
                        continue;
                    }

                    let vote = Vote::new(
                        &self.meeting_id,
                        &session.id,
                        &agent_id,
                        parsed.score,
                        parsed.pass,
                        parsed.rationale,
                        session.stage_version,
                        Utc::now(),
                    );
                    let vote = self.store.append_vote(vote).await?;
                    self.emit(EventBody::vote_received(&vote, session.kind, Utc::now())).await?;
                }
                Err(err) if err.is_cancelled() => {
                    debug!(agent_id, "vote call cancelled");
                }
                Err(err) => {
                    warn!(agent_id, error = %err, "vote call failed, excluding from aggregation");
                }
            }
        }

        Ok(())
    }
}
