//! Final-document approval (Phase 2 of the vote stage).
//!
//! After a proposal vote accepts, an editor drafts the Final Result Document
//! and every enabled agent must approve it. Approval is unanimity, not a
//! majority: one missing or negative review sends the draft back to the
//! editor with the dissenters' rationales. Three failed attempts abort the
//! meeting with the last draft persisted.

use super::{
    MeetingRunner, RunMeetingError, EDITOR_TIMEOUT_FLOOR_MS, MAX_APPROVAL_ATTEMPTS, MAX_EDITOR_CALLS,
};
use crate::ports::llm_gateway::{ChatMessage, GenerateRequest, ResponseFormat};
use crate::use_cases::shared::check_cancelled;
use chrono::Utc;
use conclave_domain::meeting::entities::MeetingPatch;
use conclave_domain::util::truncate_with_ellipsis;
use conclave_domain::{
    EventBody, Meeting, MessageRole, PromptBuilder, Vote, VoteAggregate, VoteSession,
    VoteSessionKind, VoteSessionStatus,
};
use std::time::Duration;
use tracing::{debug, info, warn};

impl MeetingRunner {
    /// Run the unanimity loop. Returns `true` when the meeting reached a
    /// terminal state (accepted, or aborted after exhausting attempts) and
    /// `false` when a user interrupt sent it back to discussion.
    pub(crate) async fn run_final_document_phase(
        &self,
        meeting: &Meeting,
        round: u32,
        proposal_text: &str,
    ) -> Result<bool, RunMeetingError> {
        let current = self.store.get_meeting(&self.meeting_id).await?;
        let stage_version = current.stage_version;

        let recent_discussion = self.recent_discussion_digest().await?;
        let mut draft = self
            .draft_final_document(meeting, proposal_text, &recent_discussion)
            .await;
        let mut last_approvals: Vec<Vote> = Vec::new();

        for attempt in 1..=MAX_APPROVAL_ATTEMPTS {
            check_cancelled(&self.meeting_cancel)?;

            // New approval session for the current draft, still at stage V.
            let (session, vote_token) = {
                let _lock = self.store.lock_meeting(&self.meeting_id).await?;
                let current = self.store.get_meeting(&self.meeting_id).await?;
                if current.stage_version != stage_version || current.state.is_terminal() {
                    return Ok(false);
                }

                let expected: Vec<String> = current
                    .config
                    .enabled_agents()
                    .iter()
                    .map(|a| a.id.clone())
                    .collect();
                let session = self
                    .store
                    .create_vote_session(
                        VoteSession::start(
                            &self.meeting_id,
                            round,
                            stage_version,
                            draft.clone(),
                            VoteSessionKind::Approval,
                            expected,
                            Utc::now(),
                        )
                        .with_attempt(attempt),
                    )
                    .await?;
                self.store
                    .update_meeting(
                        &self.meeting_id,
                        MeetingPatch {
                            active_vote_session_id: Some(Some(session.id.clone())),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.emit(EventBody::vote_session_started(&session, Utc::now())).await?;
                info!(meeting_id = %self.meeting_id, attempt, "final-document approval started");
                (session, self.rotate_vote_cancel())
            };

            self.collect_votes(meeting, &session, &vote_token).await?;

            let current = self.store.get_meeting(&self.meeting_id).await?;
            if current.stage_version != stage_version {
                debug!(meeting_id = %self.meeting_id, "approval overtaken by interrupt");
                return Ok(false);
            }

            let votes = self.store.list_votes(&self.meeting_id, Some(&session.id)).await?;
            let aggregate = VoteAggregate::from_votes(&votes);
            let unanimous =
                VoteAggregate::unanimous_over(&votes, &session.expected_voter_agent_ids);

            {
                let _lock = self.store.lock_meeting(&self.meeting_id).await?;
                let current = self.store.get_meeting(&self.meeting_id).await?;
                if current.stage_version != stage_version {
                    return Ok(false);
                }
                let status = if unanimous {
                    VoteSessionStatus::Finalized
                } else {
                    VoteSessionStatus::Incomplete
                };
                self.store
                    .finalize_vote_session(&self.meeting_id, &session.id, status, Utc::now())
                    .await?;
                self.store
                    .update_meeting(
                        &self.meeting_id,
                        MeetingPatch {
                            active_vote_session_id: Some(None),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.emit(EventBody::vote_session_final(
                    &self.meeting_id,
                    &session.id,
                    stage_version,
                    unanimous,
                    aggregate.avg_score,
                    if unanimous { "unanimous approval" } else { "unanimity not reached" },
                    VoteSessionKind::Approval,
                    Utc::now(),
                ))
                .await?;
            }

            last_approvals = votes;

            if unanimous {
                self.finish_accepted(&draft, &last_approvals).await?;
                return Ok(true);
            }

            info!(
                meeting_id = %self.meeting_id,
                attempt,
                approvals = last_approvals.iter().filter(|v| v.pass).count(),
                expected = session.expected_voter_agent_ids.len(),
                "approval attempt failed unanimity"
            );

            if attempt < MAX_APPROVAL_ATTEMPTS {
                let objections: Vec<(String, String)> = last_approvals
                    .iter()
                    .filter(|v| !v.pass)
                    .map(|v| {
                        (
                            v.voter_agent_id.clone(),
                            v.rationale.clone().unwrap_or_else(|| "no rationale given".to_string()),
                        )
                    })
                    .collect();
                if let Some(revised) = self.revise_final_document(meeting, &draft, &objections).await {
                    draft = revised;
                }
            }
        }

        self.finish_aborted(
            &format!(
                "Final result document was not approved by all agents after {MAX_APPROVAL_ATTEMPTS} attempt(s)"
            ),
            Some(&draft),
            &last_approvals,
        )
        .await?;
        Ok(true)
    }

    /// Draft the document through the editor ladder; the proposal text is
    /// the ultimate fallback.
    async fn draft_final_document(
        &self,
        meeting: &Meeting,
        proposal_text: &str,
        recent_discussion: &str,
    ) -> String {
        let prompt =
            PromptBuilder::final_document_prompt(&meeting.topic, proposal_text, recent_discussion);
        match self
            .call_editor(meeting, PromptBuilder::final_document_system(), &prompt)
            .await
        {
            Some(text) => text,
            None => {
                warn!(
                    meeting_id = %self.meeting_id,
                    "all editor calls failed, falling back to the raw proposal"
                );
                proposal_text.to_string()
            }
        }
    }

    /// Revise the draft against objections; `None` keeps the current draft.
    async fn revise_final_document(
        &self,
        meeting: &Meeting,
        draft: &str,
        objections: &[(String, String)],
    ) -> Option<String> {
        let prompt = PromptBuilder::revision_prompt(draft, objections);
        self.call_editor(meeting, PromptBuilder::final_document_system(), &prompt)
            .await
    }

    /// One editor pass: the facilitator's provider/model first, then each
    /// enabled agent's, up to [`MAX_EDITOR_CALLS`] calls total.
    async fn call_editor(&self, meeting: &Meeting, system: &str, prompt: &str) -> Option<String> {
        let timeout = Duration::from_millis(
            EDITOR_TIMEOUT_FLOOR_MS.max(meeting.config.facilitator.timeout_ms),
        );

        for (provider, model) in self.editor_candidates(meeting).into_iter().take(MAX_EDITOR_CALLS) {
            if self.meeting_cancel.is_cancelled() {
                return None;
            }

            let mut request = GenerateRequest::new(&provider, &model);
            request.messages = vec![ChatMessage::system(system), ChatMessage::user(prompt)];
            request.temperature = 0.2;
            request.max_output_tokens = 4_096;
            request.timeout = timeout;
            request.response_format = ResponseFormat::Text;

            match self.gateway.generate_text(request, &self.meeting_cancel).await {
                Ok(completion) if !completion.text.trim().is_empty() => {
                    return Some(completion.text);
                }
                Ok(_) => {
                    warn!(provider, model, "editor returned an empty document");
                }
                Err(err) if err.is_cancelled() => return None,
                Err(err) => {
                    warn!(provider, model, error = %err, "editor call failed");
                }
            }
        }
        None
    }

    /// Editor ladder: facilitator override first, then enabled agents.
    fn editor_candidates(&self, meeting: &Meeting) -> Vec<(String, String)> {
        let mut candidates = Vec::new();
        let facilitator = &meeting.config.facilitator;
        let first = meeting.config.enabled_agents().into_iter().next();
        if let (Some(provider), Some(model)) = (
            facilitator.provider.clone().or_else(|| first.map(|a| a.provider.clone())),
            facilitator.model.clone().or_else(|| first.map(|a| a.model.clone())),
        ) {
            candidates.push((provider, model));
        }
        for agent in meeting.config.enabled_agents() {
            let pair = (agent.provider.clone(), agent.model.clone());
            if !candidates.contains(&pair) {
                candidates.push(pair);
            }
        }
        candidates
    }

    /// Compact view of the most recent discussion for the drafting prompt.
    async fn recent_discussion_digest(&self) -> Result<String, RunMeetingError> {
        let messages = self.store.list_messages(&self.meeting_id, None, None).await?;
        let mut digest = String::new();
        for message in messages.iter().rev().take(15).collect::<Vec<_>>().into_iter().rev() {
            if message.role == MessageRole::System {
                continue;
            }
            digest.push_str(&format!(
                "[{}] {}\n",
                message.speaker_label(),
                truncate_with_ellipsis(&message.content, 600)
            ));
        }
        Ok(digest)
    }
}
