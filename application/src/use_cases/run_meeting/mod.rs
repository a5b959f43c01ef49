//! Run Meeting use case
//!
//! The meeting orchestrator: a per-meeting state machine that drives
//! discussion rounds, vote sessions, the final-document approval loop, and
//! the event stream, while tolerating slow or failing providers.
//!
//! Long-running provider calls are never made under the meeting lock.
//! Instead every durable write in a concurrent phase re-reads the meeting
//! and drops its result when the stage version moved (a user interrupt or
//! abort landed in between). The lock only surrounds state transitions,
//! vote-session lifecycle changes, and user-message interrupts.

mod discussion;
mod final_document;
#[cfg(test)]
mod tests;
mod voting;

use crate::ports::event_publisher::EventPublisher;
use crate::ports::llm_gateway::LlmGateway;
use crate::ports::store::{MeetingStore, StoreError};
use crate::ports::transcript::{TranscriptEvent, TranscriptLogger};
use crate::use_cases::facilitator::FacilitatorService;
use crate::use_cases::shared::check_cancelled;
use chrono::Utc;
use conclave_domain::{
    error_codes, EventBody, Meeting, MeetingResult, MeetingState, Message, MessageRole,
    ReportBuilder, SystemSpeaker, Vote, VoteSessionStatus,
};
use conclave_domain::meeting::entities::MeetingPatch;
use serde_json::json;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use voting::VoteOutcome;

/// Per-call timeout floors, in milliseconds.
pub const DISCUSSION_TIMEOUT_FLOOR_MS: u64 = 60_000;
pub const VOTE_TIMEOUT_FLOOR_MS: u64 = 15_000;
pub const EDITOR_TIMEOUT_FLOOR_MS: u64 = 90_000;

/// Final-document approval attempts before the meeting aborts.
pub(crate) const MAX_APPROVAL_ATTEMPTS: u32 = 3;
/// Editor calls per drafting or revision pass.
pub(crate) const MAX_EDITOR_CALLS: usize = 3;
/// Consecutive rounds without any agent message before the meeting aborts.
const MAX_CONSECUTIVE_EMPTY_ROUNDS: u32 = 2;
/// Transcript window handed to the facilitator.
pub(crate) const FACILITATOR_CONTEXT_MESSAGES: usize = 20;

/// Errors that can occur while running a meeting
#[derive(Error, Debug)]
pub enum RunMeetingError {
    /// The meeting run was cancelled; never reported as a failure.
    #[error("Meeting run cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Runner failure: {0}")]
    Fatal(String),
}

/// Orchestrator for one meeting.
///
/// Owns the two cancellation tokens: `meeting_cancel` lives for the whole
/// run; the vote token is rotated per vote session and additionally fires on
/// user interrupts.
pub struct MeetingRunner {
    pub(crate) store: Arc<dyn MeetingStore>,
    pub(crate) gateway: Arc<dyn LlmGateway>,
    events: Arc<dyn EventPublisher>,
    transcript: Arc<dyn TranscriptLogger>,
    pub(crate) facilitator: FacilitatorService,
    pub(crate) meeting_id: String,
    pub(crate) meeting_cancel: CancellationToken,
    vote_cancel: Mutex<CancellationToken>,
}

impl MeetingRunner {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        gateway: Arc<dyn LlmGateway>,
        events: Arc<dyn EventPublisher>,
        transcript: Arc<dyn TranscriptLogger>,
        meeting_id: impl Into<String>,
    ) -> Self {
        let meeting_cancel = CancellationToken::new();
        let vote_cancel = Mutex::new(meeting_cancel.child_token());
        Self {
            facilitator: FacilitatorService::new(Arc::clone(&gateway)),
            store,
            gateway,
            events,
            transcript,
            meeting_id: meeting_id.into(),
            meeting_cancel,
            vote_cancel,
        }
    }

    /// Token observed by every call this runner issues.
    pub fn cancel_token(&self) -> CancellationToken {
        self.meeting_cancel.clone()
    }

    /// Drive the meeting to a terminal state.
    ///
    /// A fatal error emits a `RUNNER_ERROR` event and force-aborts the
    /// meeting; cancellation quietly ensures the terminal transition. Either
    /// way the meeting is never left in a running state.
    pub async fn run(&self) -> Result<(), RunMeetingError> {
        let result = self.run_inner().await;
        match &result {
            Ok(()) => {}
            Err(RunMeetingError::Cancelled) => {
                debug!(meeting_id = %self.meeting_id, "meeting run cancelled");
                self.ensure_terminal("Meeting aborted").await;
            }
            Err(err) => {
                error!(meeting_id = %self.meeting_id, error = %err, "meeting run failed");
                let _ = self
                    .emit(EventBody::error(
                        &self.meeting_id,
                        error_codes::RUNNER_ERROR,
                        &err.to_string(),
                        None,
                        Utc::now(),
                    ))
                    .await;
                self.ensure_terminal(&format!("Runner failure: {err}")).await;
            }
        }
        result
    }

    async fn run_inner(&self) -> Result<(), RunMeetingError> {
        self.start_meeting().await?;
        let mut consecutive_empty_rounds = 0u32;

        loop {
            check_cancelled(&self.meeting_cancel)?;

            let meeting = self.store.get_meeting(&self.meeting_id).await?;
            if meeting.state.is_terminal() {
                return Ok(());
            }
            let round = meeting.round;
            let threshold = meeting.config.threshold.clone();

            if round > threshold.max_rounds {
                self.finish_aborted("Max rounds reached", None, &[]).await?;
                return Ok(());
            }

            if round > 0 && meeting.config.facilitator.enabled {
                self.facilitator_pass(&meeting, round).await?;
            }

            let produced = self.run_discussion_round(&meeting, round).await?;

            // An abort may have landed mid-round.
            let meeting = self.store.get_meeting(&self.meeting_id).await?;
            if meeting.state.is_terminal() {
                return Ok(());
            }

            if produced == 0 {
                consecutive_empty_rounds += 1;
                self.emit(EventBody::error(
                    &self.meeting_id,
                    error_codes::DISCUSSION_EMPTY_SKIP_VOTE,
                    "round produced no agent message, skipping vote",
                    Some(json!({ "round": round })),
                    Utc::now(),
                ))
                .await?;
                if consecutive_empty_rounds >= MAX_CONSECUTIVE_EMPTY_ROUNDS {
                    self.finish_aborted(
                        "No agent produced a message for 2 consecutive rounds",
                        None,
                        &[],
                    )
                    .await?;
                    return Ok(());
                }
                self.advance_round(round + 1).await?;
                continue;
            }
            consecutive_empty_rounds = 0;

            // Round 0 is always blind; voting starts at the later of round 1
            // and min_rounds, and only for rounds that actually spoke.
            if round >= 1 && round >= threshold.min_rounds {
                match self.run_vote_stage(&meeting, round).await? {
                    VoteOutcome::Accepted { proposal_text } => {
                        if self
                            .run_final_document_phase(&meeting, round, &proposal_text)
                            .await?
                        {
                            return Ok(());
                        }
                        // Interrupted mid-approval: back to discussion.
                        self.advance_round(round + 1).await?;
                    }
                    VoteOutcome::Rejected | VoteOutcome::Interrupted => {
                        self.advance_round(round + 1).await?;
                    }
                }
            } else {
                self.advance_round(round + 1).await?;
            }
        }
    }

    /// Transition Draft -> RunningDiscussion, resolving the effective
    /// discussion mode. Also recovers meetings left running by a previous
    /// process: a stale vote stage is abandoned by lifting the stage version.
    async fn start_meeting(&self) -> Result<(), RunMeetingError> {
        let _lock = self.store.lock_meeting(&self.meeting_id).await?;
        let meeting = self.store.get_meeting(&self.meeting_id).await?;

        match meeting.state {
            MeetingState::Draft => {
                let mode = meeting.config.resolve_discussion_mode();
                let updated = self
                    .store
                    .update_meeting(
                        &self.meeting_id,
                        MeetingPatch {
                            state: Some(MeetingState::RunningDiscussion),
                            stage_version: Some(meeting.stage_version + 1),
                            effective_discussion_mode: Some(mode),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(meeting_id = %self.meeting_id, %mode, "meeting started");
                self.emit(EventBody::state_changed(&updated, Utc::now())).await?;
            }
            MeetingState::RunningDiscussion => {
                info!(meeting_id = %self.meeting_id, round = meeting.round, "resuming meeting");
            }
            MeetingState::RunningVote => {
                if let Some(session_id) = &meeting.active_vote_session_id {
                    let _ = self
                        .store
                        .finalize_vote_session(
                            &self.meeting_id,
                            session_id,
                            VoteSessionStatus::Aborted,
                            Utc::now(),
                        )
                        .await;
                }
                let updated = self
                    .store
                    .update_meeting(
                        &self.meeting_id,
                        MeetingPatch {
                            state: Some(MeetingState::RunningDiscussion),
                            stage_version: Some(meeting.stage_version + 1),
                            active_vote_session_id: Some(None),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(meeting_id = %self.meeting_id, "recovered meeting from stale vote stage");
                self.emit(EventBody::state_changed(&updated, Utc::now())).await?;
            }
            MeetingState::FinishedAccepted | MeetingState::FinishedAborted => {}
        }
        Ok(())
    }

    /// Append a user message.
    ///
    /// In `RunningVote` this is an interrupt: the stage version is lifted,
    /// the active session is marked aborted, in-flight vote calls are
    /// cancelled, and the meeting returns to discussion. In
    /// `RunningDiscussion` the message is merely appended; the next agent
    /// invocation picks it up through the fresh-messages read.
    pub async fn post_user_message(&self, content: &str) -> Result<Message, RunMeetingError> {
        let _lock = self.store.lock_meeting(&self.meeting_id).await?;
        let meeting = self.store.get_meeting(&self.meeting_id).await?;

        if meeting.state.is_terminal() {
            return Err(RunMeetingError::Fatal(format!(
                "meeting {} is already finished",
                self.meeting_id
            )));
        }

        let message = Message::user(&self.meeting_id, content, meeting.round, Utc::now());
        let message = self.store.append_message(message).await?;
        self.emit(EventBody::message_final(&message, Utc::now())).await?;

        if meeting.state == MeetingState::RunningVote {
            if let Some(session_id) = &meeting.active_vote_session_id {
                let _ = self
                    .store
                    .finalize_vote_session(
                        &self.meeting_id,
                        session_id,
                        VoteSessionStatus::Aborted,
                        Utc::now(),
                    )
                    .await;
            }
            let updated = self
                .store
                .update_meeting(
                    &self.meeting_id,
                    MeetingPatch {
                        state: Some(MeetingState::RunningDiscussion),
                        stage_version: Some(meeting.stage_version + 1),
                        active_vote_session_id: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
            self.current_vote_cancel().cancel();
            info!(
                meeting_id = %self.meeting_id,
                stage_version = updated.stage_version,
                "user interrupt aborted the active vote session"
            );
            self.emit(EventBody::state_changed(&updated, Utc::now())).await?;
        }

        Ok(message)
    }

    /// Explicit abort: cancel everything in flight and finish the meeting.
    pub async fn abort(&self, reason: &str) -> Result<(), RunMeetingError> {
        self.meeting_cancel.cancel();
        self.current_vote_cancel().cancel();
        self.finish_aborted(reason, None, &[]).await
    }

    /// Facilitator pass over the round that just completed.
    async fn facilitator_pass(&self, meeting: &Meeting, round: u32) -> Result<(), RunMeetingError> {
        let completed = round - 1;
        let messages = self.store.list_messages(&self.meeting_id, None, None).await?;

        let mut recent: Vec<Message> = messages
            .iter()
            .filter(|m| m.meta.round >= completed)
            .cloned()
            .collect();
        if recent.len() > FACILITATOR_CONTEXT_MESSAGES {
            let cut = recent.len() - FACILITATOR_CONTEXT_MESSAGES;
            recent.drain(..cut);
        }

        let round_messages: Vec<Message> = messages
            .iter()
            .filter(|m| m.role == MessageRole::Agent && m.meta.round == completed)
            .cloned()
            .collect();
        let draft = conclave_domain::PromptBuilder::build_proposal_text(&round_messages);
        let rolling = self.rolling_summary_for(meeting, &messages);

        let Some(output) = self
            .facilitator
            .run(
                meeting,
                completed,
                rolling.as_deref(),
                &recent,
                &draft,
                &self.meeting_cancel,
            )
            .await
        else {
            return Ok(());
        };

        check_cancelled(&self.meeting_cancel)?;

        let message = Message::system(
            &self.meeting_id,
            SystemSpeaker::Facilitator,
            output.to_markdown(),
            completed,
            Utc::now(),
        );
        let message = self.store.append_message(message).await?;
        self.emit(EventBody::facilitator_output(
            &self.meeting_id,
            meeting.stage_version,
            completed,
            &output,
            Utc::now(),
        ))
        .await?;
        self.emit(EventBody::message_final(&message, Utc::now())).await?;
        Ok(())
    }

    pub(crate) async fn advance_round(&self, next_round: u32) -> Result<(), RunMeetingError> {
        self.store
            .update_meeting(
                &self.meeting_id,
                MeetingPatch { round: Some(next_round), ..Default::default() },
            )
            .await?;
        Ok(())
    }

    /// Append to the event log, then fan out live. Append-before-publish is
    /// what keeps replay cursors gap-free.
    pub(crate) async fn emit(&self, body: EventBody) -> Result<(), RunMeetingError> {
        let event = self.store.append_event(body).await?;
        self.transcript.log(TranscriptEvent::new(
            event.kind().as_str(),
            event.body.payload.clone(),
        ));
        self.events.publish(&event);
        Ok(())
    }

    /// Latest facilitator message content, when rolling summaries are on.
    pub(crate) fn rolling_summary_for(&self, meeting: &Meeting, messages: &[Message]) -> Option<String> {
        if !meeting.config.discussion.rolling_summary {
            return None;
        }
        messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::System && m.system_id == Some(SystemSpeaker::Facilitator))
            .map(|m| m.content.clone())
    }

    pub(crate) fn current_vote_cancel(&self) -> CancellationToken {
        self.vote_cancel.lock().expect("vote token poisoned").clone()
    }

    /// Fresh vote token for a new session, linked to the meeting token.
    pub(crate) fn rotate_vote_cancel(&self) -> CancellationToken {
        let token = self.meeting_cancel.child_token();
        *self.vote_cancel.lock().expect("vote token poisoned") = token.clone();
        token
    }

    /// Build the terminal result from everything the meeting owns.
    async fn build_result(
        &self,
        meeting: &Meeting,
        accepted: bool,
        reason: &str,
        final_document: Option<&str>,
        approvals: &[Vote],
    ) -> Result<MeetingResult, RunMeetingError> {
        let messages = self.store.list_messages(&self.meeting_id, None, None).await?;
        let votes = self.store.list_votes(&self.meeting_id, None).await?;
        let report_markdown = ReportBuilder::build_markdown(
            meeting, &messages, &votes, final_document, approvals, reason, accepted,
        );
        let summary_json = ReportBuilder::build_summary_json(
            meeting, &messages, &votes, final_document, approvals, reason, accepted,
        );
        Ok(MeetingResult {
            accepted,
            reason: reason.to_string(),
            concluded_at: Utc::now(),
            report_markdown,
            summary_json,
        })
    }

    /// Terminal transition to FinishedAborted with a persisted result.
    pub(crate) async fn finish_aborted(
        &self,
        reason: &str,
        final_document: Option<&str>,
        approvals: &[Vote],
    ) -> Result<(), RunMeetingError> {
        let _lock = self.store.lock_meeting(&self.meeting_id).await?;
        let meeting = self.store.get_meeting(&self.meeting_id).await?;
        if meeting.state.is_terminal() {
            return Ok(());
        }

        if let Some(session_id) = &meeting.active_vote_session_id {
            let _ = self
                .store
                .finalize_vote_session(
                    &self.meeting_id,
                    session_id,
                    VoteSessionStatus::Aborted,
                    Utc::now(),
                )
                .await;
        }

        let result = self
            .build_result(&meeting, false, reason, final_document, approvals)
            .await?;
        let updated = self
            .store
            .update_meeting(
                &self.meeting_id,
                MeetingPatch {
                    state: Some(MeetingState::FinishedAborted),
                    stage_version: Some(meeting.stage_version + 1),
                    active_vote_session_id: Some(None),
                    result: Some(result),
                    ..Default::default()
                },
            )
            .await?;
        info!(meeting_id = %self.meeting_id, reason, "meeting aborted");
        self.emit(EventBody::state_changed(&updated, Utc::now())).await?;
        Ok(())
    }

    /// Terminal transition to FinishedAccepted with a persisted result.
    pub(crate) async fn finish_accepted(
        &self,
        final_document: &str,
        approvals: &[Vote],
    ) -> Result<(), RunMeetingError> {
        let _lock = self.store.lock_meeting(&self.meeting_id).await?;
        let meeting = self.store.get_meeting(&self.meeting_id).await?;
        if meeting.state.is_terminal() {
            return Ok(());
        }

        let reason = "Final result document approved by all agents";
        let result = self
            .build_result(&meeting, true, reason, Some(final_document), approvals)
            .await?;
        let updated = self
            .store
            .update_meeting(
                &self.meeting_id,
                MeetingPatch {
                    state: Some(MeetingState::FinishedAccepted),
                    stage_version: Some(meeting.stage_version + 1),
                    active_vote_session_id: Some(None),
                    result: Some(result),
                    ..Default::default()
                },
            )
            .await?;
        info!(meeting_id = %self.meeting_id, "meeting accepted");
        self.emit(EventBody::state_changed(&updated, Utc::now())).await?;
        Ok(())
    }

    /// Best-effort: never leave the meeting in a running state.
    async fn ensure_terminal(&self, reason: &str) {
        match self.store.get_meeting(&self.meeting_id).await {
            Ok(meeting) if !meeting.state.is_terminal() => {
                if let Err(err) = self.finish_aborted(reason, None, &[]).await {
                    warn!(meeting_id = %self.meeting_id, error = %err, "failed to force-abort meeting");
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(meeting_id = %self.meeting_id, error = %err, "failed to read meeting during cleanup");
            }
        }
    }
}
