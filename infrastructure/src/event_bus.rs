//! In-memory event bus.
//!
//! Fan-out of meeting events to live subscribers, per meeting. Publishing
//! never blocks the orchestrator: subscribers hang off unbounded channels
//! and dead receivers are pruned on the next publish.
//!
//! Replay works together with the store's event log: a [`Subscription`]
//! carries a backlog fetched from the store plus the live channel, and
//! deduplicates by the monotone event id, so a consumer that re-requests
//! events after its cursor sees a gap-free prefix of the log.

use conclave_application::EventPublisher;
use conclave_domain::MeetingEvent;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Live fan-out hub with one subscriber set per meeting.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<MeetingEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a live subscriber for one meeting.
    ///
    /// `backlog` is delivered first; live events with ids at or below the
    /// last delivered id are skipped, which makes attach-then-replay safe.
    pub fn subscribe(&self, meeting_id: &str, backlog: Vec<MeetingEvent>, after: u64) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("bus poisoned")
            .entry(meeting_id.to_string())
            .or_default()
            .push(tx);
        Subscription {
            backlog: backlog.into(),
            receiver: rx,
            last_delivered: after,
        }
    }

    /// Subscribers currently attached to a meeting.
    pub fn subscriber_count(&self, meeting_id: &str) -> usize {
        self.subscribers
            .lock()
            .expect("bus poisoned")
            .get(meeting_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: &MeetingEvent) {
        let mut subscribers = self.subscribers.lock().expect("bus poisoned");
        if let Some(senders) = subscribers.get_mut(event.meeting_id()) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// One consumer's ordered, deduplicated view of a meeting's events.
pub struct Subscription {
    backlog: VecDeque<MeetingEvent>,
    receiver: mpsc::UnboundedReceiver<MeetingEvent>,
    last_delivered: u64,
}

impl Subscription {
    /// Provide the replay backlog. Called right after subscribing, before
    /// consumption starts; the id check handles any overlap with events
    /// that also arrived live in the meantime.
    pub fn preload(&mut self, events: Vec<MeetingEvent>) {
        self.backlog.extend(events);
    }

    /// Next event, backlog first, live afterwards. Returns `None` once the
    /// live channel is closed and the backlog is drained.
    pub async fn next(&mut self) -> Option<MeetingEvent> {
        while let Some(event) = self.backlog.pop_front() {
            if event.id > self.last_delivered {
                self.last_delivered = event.id;
                return Some(event);
            }
        }
        loop {
            let event = self.receiver.recv().await?;
            if event.id > self.last_delivered {
                self.last_delivered = event.id;
                return Some(event);
            }
        }
    }

    /// Drain whatever is immediately available without waiting.
    pub fn drain_ready(&mut self) -> Vec<MeetingEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.backlog.pop_front() {
            if event.id > self.last_delivered {
                self.last_delivered = event.id;
                events.push(event);
            }
        }
        while let Ok(event) = self.receiver.try_recv() {
            if event.id > self.last_delivered {
                self.last_delivered = event.id;
                events.push(event);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conclave_domain::{error_codes, EventBody};

    fn event(id: u64, meeting_id: &str) -> MeetingEvent {
        MeetingEvent {
            id,
            body: EventBody::error(meeting_id, error_codes::AGENT_ERROR, "x", None, Utc::now()),
        }
    }

    #[tokio::test]
    async fn publish_reaches_only_that_meetings_subscribers() {
        let bus = EventBus::new();
        let mut sub_a = bus.subscribe("a", vec![], 0);
        let mut sub_b = bus.subscribe("b", vec![], 0);

        bus.publish(&event(1, "a"));
        assert_eq!(sub_a.next().await.unwrap().id, 1);
        assert!(sub_b.drain_ready().is_empty());
    }

    #[tokio::test]
    async fn backlog_is_delivered_before_live_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("m", vec![event(1, "m"), event(2, "m")], 0);
        bus.publish(&event(3, "m"));

        assert_eq!(sub.next().await.unwrap().id, 1);
        assert_eq!(sub.next().await.unwrap().id, 2);
        assert_eq!(sub.next().await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn overlap_between_backlog_and_live_is_deduplicated() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("m", vec![event(1, "m"), event(2, "m")], 0);
        // The same event arrives live (it was published while the backlog
        // was being fetched) plus one genuinely new event.
        bus.publish(&event(2, "m"));
        bus.publish(&event(3, "m"));

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(sub.next().await.unwrap().id);
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cursor_skips_already_seen_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("m", vec![event(1, "m"), event(2, "m"), event(3, "m")], 2);
        assert_eq!(sub.next().await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe("m", vec![], 0);
        assert_eq!(bus.subscriber_count("m"), 1);
        drop(sub);
        bus.publish(&event(1, "m"));
        assert_eq!(bus.subscriber_count("m"), 0);
    }
}
