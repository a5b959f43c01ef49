//! Store port
//!
//! Persistence plus per-meeting mutual exclusion and the append-only event
//! log. A meeting owns its messages, votes, vote sessions and events; nothing
//! references another meeting's rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conclave_domain::meeting::entities::MeetingPatch;
use conclave_domain::{EventBody, Meeting, MeetingEvent, Message, Vote, VoteSession, VoteSessionStatus};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

/// Errors that can occur in store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    #[error("Vote session not found: {0}")]
    VoteSessionNotFound(String),

    #[error("Storage failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Owned guard for a meeting's critical sections.
///
/// All state transitions, vote-session lifecycle changes, and user-message
/// interrupts happen while one of these is held. Fairness and reentrancy are
/// not guaranteed.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MeetingLock {
    _guard: OwnedMutexGuard<()>,
}

impl MeetingLock {
    pub fn new(guard: OwnedMutexGuard<()>) -> Self {
        Self { _guard: guard }
    }
}

/// Persistence port for meetings and everything they own.
///
/// Appends are atomic and event ids are allocated monotonically per process;
/// `update_meeting` with the same patch twice is equivalent to once.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    /// Acquire the per-meeting mutex.
    async fn lock_meeting(&self, meeting_id: &str) -> StoreResult<MeetingLock>;

    /// Persist a freshly built Draft meeting.
    async fn create_meeting(&self, meeting: Meeting) -> StoreResult<Meeting>;

    async fn get_meeting(&self, meeting_id: &str) -> StoreResult<Meeting>;

    /// Most recent first. `cursor` is the id of the last meeting of the
    /// previous page.
    async fn list_meetings(&self, limit: usize, cursor: Option<&str>) -> StoreResult<Vec<Meeting>>;

    /// Apply a restricted patch; returns the updated meeting.
    async fn update_meeting(&self, meeting_id: &str, patch: MeetingPatch) -> StoreResult<Meeting>;

    async fn append_message(&self, message: Message) -> StoreResult<Message>;

    /// Chronological. With `after_message_id`, only messages appended after
    /// that id are returned.
    async fn list_messages(
        &self,
        meeting_id: &str,
        after_message_id: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Message>>;

    async fn create_vote_session(&self, session: VoteSession) -> StoreResult<VoteSession>;

    async fn get_vote_session(&self, meeting_id: &str, session_id: &str) -> StoreResult<VoteSession>;

    async fn finalize_vote_session(
        &self,
        meeting_id: &str,
        session_id: &str,
        status: VoteSessionStatus,
        ended_at: DateTime<Utc>,
    ) -> StoreResult<VoteSession>;

    async fn append_vote(&self, vote: Vote) -> StoreResult<Vote>;

    async fn list_votes(&self, meeting_id: &str, vote_session_id: Option<&str>) -> StoreResult<Vec<Vote>>;

    /// Append an event, allocating its monotone id.
    async fn append_event(&self, body: EventBody) -> StoreResult<MeetingEvent>;

    /// Events with id strictly greater than `after`, ascending.
    async fn list_events(
        &self,
        meeting_id: &str,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<MeetingEvent>>;
}
