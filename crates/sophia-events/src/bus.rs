//! Priority queue connecting adapters to the event processor.
//!
//! Single consumer, many producers. Producers on the async runtime use
//! `put`; callbacks running on foreign threads use `put_threadsafe`. Both
//! feed the same heap, so no loop binding is required.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use crate::types::Event;

#[derive(Default)]
pub struct EventBus {
    heap: Mutex<BinaryHeap<Reverse<Event>>>,
    notify: Notify,
    unfinished: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event (async producers).
    pub async fn put(&self, event: Event) {
        self.push(event);
    }

    /// Enqueue an event from any thread.
    pub fn put_threadsafe(&self, event: Event) {
        self.push(event);
    }

    fn push(&self, event: Event) {
        debug!(event_id = %event.event_id, event_type = %event.event_type, "enqueued");
        self.heap.lock().unwrap().push(Reverse(event));
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Await the highest-priority event. Ordering is strictly
    /// `(priority ascending, created_at ascending)`.
    pub async fn get(&self) -> Event {
        loop {
            // Register interest before checking, so a push between the check
            // and the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(event) = self.try_pop() {
                return event;
            }
            notified.await;
        }
    }

    fn try_pop(&self) -> Option<Event> {
        self.heap.lock().unwrap().pop().map(|Reverse(e)| e)
    }

    /// Mark the most recent `get()` as processed.
    pub fn task_done(&self) {
        let _ = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn empty(&self) -> bool {
        self.heap.lock().unwrap().is_empty()
    }

    /// Approximate number of pending events.
    pub fn qsize(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    /// Clone of the highest-priority event without removing it. The item
    /// may be consumed before the caller acts on it; good enough for
    /// preemption heuristics.
    pub fn peek(&self) -> Option<Event> {
        self.heap.lock().unwrap().peek().map(|Reverse(e)| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventPriority, EventType};
    use chrono::Utc;

    fn event_at(priority: EventPriority, secs: i64, tag: &str) -> Event {
        let mut e = Event::chat_message("s", tag, priority, "test");
        e.created_at = chrono::DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
        e
    }

    #[tokio::test]
    async fn delivers_by_priority_then_fifo() {
        // Goal-driven first in, user second, scheduled third;
        // delivery order is user, scheduled, goal.
        let bus = EventBus::new();
        bus.put(event_at(EventPriority::GoalDriven, 1, "goal")).await;
        bus.put(event_at(EventPriority::UserDirect, 2, "user")).await;
        bus.put(event_at(EventPriority::Scheduled, 3, "sched")).await;

        assert_eq!(bus.get().await.payload.content, "user");
        assert_eq!(bus.get().await.payload.content, "sched");
        assert_eq!(bus.get().await.payload.content, "goal");
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let bus = EventBus::new();
        bus.put(event_at(EventPriority::UserDirect, 1, "first")).await;
        bus.put(event_at(EventPriority::UserDirect, 2, "second")).await;
        assert_eq!(bus.get().await.payload.content, "first");
        assert_eq!(bus.get().await.payload.content, "second");
    }

    #[tokio::test]
    async fn get_waits_for_put() {
        let bus = std::sync::Arc::new(EventBus::new());
        let consumer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.get().await.payload.content })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        bus.put_threadsafe(event_at(EventPriority::UserDirect, 1, "late"));
        assert_eq!(consumer.await.unwrap(), "late");
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let bus = EventBus::new();
        bus.put(event_at(EventPriority::UserDirect, 1, "only")).await;
        assert_eq!(bus.peek().unwrap().payload.content, "only");
        assert_eq!(bus.qsize(), 1);
        assert!(!bus.empty());
        let _ = bus.get().await;
        assert!(bus.empty());
        assert!(bus.peek().is_none());
    }

    #[tokio::test]
    async fn shutdown_event_preempts_queue() {
        let bus = EventBus::new();
        bus.put(event_at(EventPriority::UserDirect, 1, "user")).await;
        bus.put(Event::shutdown()).await;
        assert_eq!(bus.get().await.event_type, EventType::Shutdown);
    }
}
