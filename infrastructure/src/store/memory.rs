//! In-memory store.
//!
//! Tables live behind one `std::sync::Mutex` (every operation is a short
//! critical section over plain maps), while per-meeting mutual exclusion
//! uses separate `tokio::sync::Mutex` handles so a held meeting lock never
//! blocks unrelated meetings. Event ids come from a process-wide counter,
//! so they are monotone across all meetings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conclave_application::ports::store::{MeetingLock, MeetingStore, StoreError, StoreResult};
use conclave_domain::meeting::entities::MeetingPatch;
use conclave_domain::{EventBody, Meeting, MeetingEvent, Message, Vote, VoteSession, VoteSessionStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Default)]
struct Tables {
    meetings: HashMap<String, Meeting>,
    /// Insertion order doubles as chronological order for appends.
    messages: Vec<Message>,
    sessions: HashMap<String, VoteSession>,
    votes: Vec<Vote>,
    events: Vec<MeetingEvent>,
    locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// Process-local store; the reference adapter and the one the tests run on.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    next_event_id: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_handle(&self, meeting_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut tables = self.tables.lock().expect("store poisoned");
        tables
            .locks
            .entry(meeting_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl MeetingStore for InMemoryStore {
    async fn lock_meeting(&self, meeting_id: &str) -> StoreResult<MeetingLock> {
        let handle = self.lock_handle(meeting_id);
        Ok(MeetingLock::new(handle.lock_owned().await))
    }

    async fn create_meeting(&self, meeting: Meeting) -> StoreResult<Meeting> {
        let mut tables = self.tables.lock().expect("store poisoned");
        tables.meetings.insert(meeting.id.clone(), meeting.clone());
        Ok(meeting)
    }

    async fn get_meeting(&self, meeting_id: &str) -> StoreResult<Meeting> {
        self.tables
            .lock()
            .expect("store poisoned")
            .meetings
            .get(meeting_id)
            .cloned()
            .ok_or_else(|| StoreError::MeetingNotFound(meeting_id.to_string()))
    }

    async fn list_meetings(&self, limit: usize, cursor: Option<&str>) -> StoreResult<Vec<Meeting>> {
        let tables = self.tables.lock().expect("store poisoned");
        let mut meetings: Vec<Meeting> = tables.meetings.values().cloned().collect();
        meetings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(cursor) = cursor
            && let Some(pos) = meetings.iter().position(|m| m.id == cursor)
        {
            meetings.drain(..=pos);
        }
        meetings.truncate(limit);
        Ok(meetings)
    }

    async fn update_meeting(&self, meeting_id: &str, patch: MeetingPatch) -> StoreResult<Meeting> {
        let mut tables = self.tables.lock().expect("store poisoned");
        let meeting = tables
            .meetings
            .get_mut(meeting_id)
            .ok_or_else(|| StoreError::MeetingNotFound(meeting_id.to_string()))?;
        // A refused patch is usually a benign race (a round advance losing
        // to an abort); record it and return the meeting as it stands.
        if let Err(err) = patch.apply(meeting, Utc::now()) {
            warn!(meeting_id, error = %err, "meeting patch refused");
        }
        Ok(meeting.clone())
    }

    async fn append_message(&self, message: Message) -> StoreResult<Message> {
        let mut tables = self.tables.lock().expect("store poisoned");
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        meeting_id: &str,
        after_message_id: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Message>> {
        let tables = self.tables.lock().expect("store poisoned");
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.meeting_id == meeting_id)
            .cloned()
            .collect();
        if let Some(after) = after_message_id
            && let Some(pos) = messages.iter().position(|m| m.id == after)
        {
            messages.drain(..=pos);
        }
        if let Some(limit) = limit {
            let cut = messages.len().saturating_sub(limit);
            messages.drain(..cut);
        }
        Ok(messages)
    }

    async fn create_vote_session(&self, session: VoteSession) -> StoreResult<VoteSession> {
        let mut tables = self.tables.lock().expect("store poisoned");
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_vote_session(&self, meeting_id: &str, session_id: &str) -> StoreResult<VoteSession> {
        self.tables
            .lock()
            .expect("store poisoned")
            .sessions
            .get(session_id)
            .filter(|s| s.meeting_id == meeting_id)
            .cloned()
            .ok_or_else(|| StoreError::VoteSessionNotFound(session_id.to_string()))
    }

    async fn finalize_vote_session(
        &self,
        meeting_id: &str,
        session_id: &str,
        status: VoteSessionStatus,
        ended_at: DateTime<Utc>,
    ) -> StoreResult<VoteSession> {
        let mut tables = self.tables.lock().expect("store poisoned");
        let session = tables
            .sessions
            .get_mut(session_id)
            .filter(|s| s.meeting_id == meeting_id)
            .ok_or_else(|| StoreError::VoteSessionNotFound(session_id.to_string()))?;
        // Idempotent: finalizing an already-terminal session changes nothing.
        if !session.status.is_terminal() {
            session.status = status;
            session.ended_at = Some(ended_at);
        }
        Ok(session.clone())
    }

    async fn append_vote(&self, vote: Vote) -> StoreResult<Vote> {
        let mut tables = self.tables.lock().expect("store poisoned");
        tables.votes.push(vote.clone());
        Ok(vote)
    }

    async fn list_votes(&self, meeting_id: &str, vote_session_id: Option<&str>) -> StoreResult<Vec<Vote>> {
        let tables = self.tables.lock().expect("store poisoned");
        Ok(tables
            .votes
            .iter()
            .filter(|v| v.meeting_id == meeting_id)
            .filter(|v| vote_session_id.is_none_or(|s| v.vote_session_id == s))
            .cloned()
            .collect())
    }

    async fn append_event(&self, body: EventBody) -> StoreResult<MeetingEvent> {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1;
        let event = MeetingEvent { id, body };
        let mut tables = self.tables.lock().expect("store poisoned");
        tables.events.push(event.clone());
        Ok(event)
    }

    async fn list_events(
        &self,
        meeting_id: &str,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<MeetingEvent>> {
        let tables = self.tables.lock().expect("store poisoned");
        let events = tables
            .events
            .iter()
            .filter(|e| e.meeting_id() == meeting_id)
            .filter(|e| after.is_none_or(|a| e.id > a))
            .cloned();
        Ok(match limit {
            Some(limit) => events.take(limit).collect(),
            None => events.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::{AgentConfig, MeetingConfig, MeetingState, VoteSessionKind};

    fn meeting() -> Meeting {
        let config = MeetingConfig::new(vec![
            AgentConfig::new("a", "mock", "mock-default"),
            AgentConfig::new("b", "mock", "mock-default"),
            AgentConfig::new("c", "mock", "mock-default"),
        ]);
        Meeting::new("topic", config, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let store = InMemoryStore::new();
        let created = store.create_meeting(meeting()).await.unwrap();
        let fetched = store.get_meeting(&created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.state, MeetingState::Draft);
    }

    #[tokio::test]
    async fn get_missing_meeting_errors() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get_meeting("nope").await,
            Err(StoreError::MeetingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_meeting_is_idempotent() {
        let store = InMemoryStore::new();
        let created = store.create_meeting(meeting()).await.unwrap();
        let patch = MeetingPatch {
            state: Some(MeetingState::RunningDiscussion),
            stage_version: Some(1),
            ..Default::default()
        };
        let first = store.update_meeting(&created.id, patch.clone()).await.unwrap();
        let second = store.update_meeting(&created.id, patch).await.unwrap();
        assert_eq!(first.state, second.state);
        assert_eq!(first.stage_version, second.stage_version);
    }

    #[tokio::test]
    async fn event_ids_are_monotone_across_meetings() {
        let store = InMemoryStore::new();
        let a = store.create_meeting(meeting()).await.unwrap();
        let b = store.create_meeting(meeting()).await.unwrap();

        let mut last = 0;
        for meeting_id in [&a.id, &b.id, &a.id, &b.id] {
            let m = store.get_meeting(meeting_id).await.unwrap();
            let event = store
                .append_event(EventBody::state_changed(&m, Utc::now()))
                .await
                .unwrap();
            assert!(event.id > last);
            last = event.id;
        }
    }

    #[tokio::test]
    async fn list_events_after_cursor_is_gap_free() {
        let store = InMemoryStore::new();
        let m = store.create_meeting(meeting()).await.unwrap();
        for _ in 0..5 {
            store
                .append_event(EventBody::state_changed(&m, Utc::now()))
                .await
                .unwrap();
        }
        let all = store.list_events(&m.id, None, None).await.unwrap();
        assert_eq!(all.len(), 5);
        let cursor = all[1].id;
        let rest = store.list_events(&m.id, Some(cursor), None).await.unwrap();
        let ids: Vec<u64> = rest.iter().map(|e| e.id).collect();
        assert_eq!(ids, all[2..].iter().map(|e| e.id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn messages_are_scoped_to_their_meeting() {
        let store = InMemoryStore::new();
        let a = store.create_meeting(meeting()).await.unwrap();
        let b = store.create_meeting(meeting()).await.unwrap();
        store
            .append_message(Message::user(&a.id, "for a", 0, Utc::now()))
            .await
            .unwrap();
        store
            .append_message(Message::user(&b.id, "for b", 0, Utc::now()))
            .await
            .unwrap();

        let for_a = store.list_messages(&a.id, None, None).await.unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].content, "for a");
    }

    #[tokio::test]
    async fn list_messages_after_id() {
        let store = InMemoryStore::new();
        let m = store.create_meeting(meeting()).await.unwrap();
        let first = store
            .append_message(Message::user(&m.id, "one", 0, Utc::now()))
            .await
            .unwrap();
        store
            .append_message(Message::user(&m.id, "two", 0, Utc::now()))
            .await
            .unwrap();

        let after = store.list_messages(&m.id, Some(&first.id), None).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].content, "two");
    }

    #[tokio::test]
    async fn finalize_vote_session_is_idempotent() {
        let store = InMemoryStore::new();
        let m = store.create_meeting(meeting()).await.unwrap();
        let session = store
            .create_vote_session(VoteSession::start(
                &m.id,
                1,
                2,
                "p",
                VoteSessionKind::Proposal,
                vec!["a".into()],
                Utc::now(),
            ))
            .await
            .unwrap();

        let finalized = store
            .finalize_vote_session(&m.id, &session.id, VoteSessionStatus::Finalized, Utc::now())
            .await
            .unwrap();
        assert_eq!(finalized.status, VoteSessionStatus::Finalized);

        // A second finalization with a different status is a no-op.
        let again = store
            .finalize_vote_session(&m.id, &session.id, VoteSessionStatus::Aborted, Utc::now())
            .await
            .unwrap();
        assert_eq!(again.status, VoteSessionStatus::Finalized);
    }

    #[tokio::test]
    async fn meeting_lock_is_exclusive() {
        let store = Arc::new(InMemoryStore::new());
        let m = store.create_meeting(meeting()).await.unwrap();

        let guard = store.lock_meeting(&m.id).await.unwrap();
        let store2 = Arc::clone(&store);
        let id = m.id.clone();
        let contender = tokio::spawn(async move { store2.lock_meeting(&id).await.unwrap() });

        // The contender cannot acquire while the guard is held.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }
}
