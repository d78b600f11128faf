// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Bus (component H): topic pub/sub with priorities, bounded history,
//! and regex-triggered output subscriptions.
//!
//! Each subscription owns a bounded queue and a dedicated worker task so a
//! slow handler cannot block delivery to other subscribers. Overflow
//! policy is drop-oldest-at-lowest-priority, with a `bus.dropped` event
//! published for the drop (except for drops of `bus.dropped` itself, which
//! would recurse).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::KernelError;
use crate::id::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
    pub priority: Priority,
    pub emitted_at: u64,
    pub sequence_no: u64,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

pub type SubscriptionId = u64;

const DEFAULT_QUEUE_CAP: usize = 256;

/// Returns true if `topic` matches `pattern`, where `pattern` is either an
/// exact topic or a prefix ending in `.*`.
fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => topic == prefix || topic.starts_with(&format!("{prefix}.")),
        None => pattern == topic,
    }
}

struct SubscriberQueue {
    capacity: usize,
    items: Mutex<Vec<Event>>,
    notify: Notify,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self { capacity, items: Mutex::new(Vec::new()), notify: Notify::new() }
    }

    /// Pushes `event`; returns `Some(dropped)` if capacity forced an eviction.
    async fn push(&self, event: Event) -> Option<Event> {
        let mut items = self.items.lock().await;
        let dropped = if items.len() >= self.capacity {
            let idx = items
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(a.sequence_no.cmp(&b.sequence_no)))
                .map(|(i, _)| i);
            idx.map(|i| items.remove(i))
        } else {
            None
        };
        items.push(event);
        drop(items);
        self.notify.notify_one();
        dropped
    }

    async fn pop_next(&self) -> Option<Event> {
        let mut items = self.items.lock().await;
        let idx = items
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.sequence_no.cmp(&a.sequence_no)))
            .map(|(i, _)| i)?;
        Some(items.remove(idx))
    }
}

struct Subscription {
    pattern: String,
    queue: Arc<SubscriberQueue>,
    shutdown: CancellationToken,
}

pub struct EventBus {
    sequence: AtomicU64,
    next_id: AtomicU64,
    history: RwLock<HashMap<String, VecDeque<Event>>>,
    history_cap: usize,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    clock: Arc<dyn Clock>,
}

impl EventBus {
    pub fn new(history_cap: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            history: RwLock::new(HashMap::new()),
            history_cap,
            subscriptions: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn publish(&self, topic: &str, payload: Value, priority: Priority) -> Event {
        let sequence_no = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = Event { topic: topic.to_string(), payload, priority, emitted_at: self.clock.now_utc(), sequence_no };

        {
            let mut history = self.history.write().await;
            let deque = history.entry(topic.to_string()).or_default();
            deque.push_back(event.clone());
            while deque.len() > self.history_cap {
                deque.pop_front();
            }
        }

        let mut drops = Vec::new();
        {
            let subs = self.subscriptions.read().await;
            for sub in subs.values() {
                if topic_matches(&sub.pattern, topic) {
                    if let Some(dropped) = sub.queue.push(event.clone()).await {
                        drops.push(dropped);
                    }
                }
            }
        }

        if topic != "bus.dropped" {
            for dropped in drops {
                warn!(topic = %dropped.topic, "event bus subscriber queue overflowed, dropping oldest-lowest-priority");
                Box::pin(self.publish(
                    "bus.dropped",
                    serde_json::json!({"topic": dropped.topic, "sequence_no": dropped.sequence_no}),
                    Priority::High,
                ))
                .await;
            }
        }

        event
    }

    /// Subscribe to an exact topic or a `prefix.*` pattern. The handler is
    /// run on a dedicated worker task; events are delivered FIFO by
    /// `sequence_no` within each priority class (highest first).
    pub async fn subscribe(&self, pattern: impl Into<String>, handler: Handler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(SubscriberQueue::new(DEFAULT_QUEUE_CAP));
        let shutdown = CancellationToken::new();

        let worker_queue = Arc::clone(&queue);
        let worker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                match worker_queue.pop_next().await {
                    Some(event) => handler(event).await,
                    None => {
                        tokio::select! {
                            _ = worker_queue.notify.notified() => {}
                            _ = worker_shutdown.cancelled() => break,
                        }
                    }
                }
            }
        });

        self.subscriptions
            .write()
            .await
            .insert(id, Subscription { pattern: pattern.into(), queue, shutdown });
        id
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), KernelError> {
        let mut subs = self.subscriptions.write().await;
        match subs.remove(&id) {
            Some(sub) => {
                sub.shutdown.cancel();
                Ok(())
            }
            None => Err(KernelError::not_found("subscription", id.to_string())),
        }
    }

    pub async fn history(&self, topic: &str, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        match history.get(topic) {
            Some(deque) => deque.iter().rev().take(limit).rev().cloned().collect(),
            None => Vec::new(),
        }
    }
}

/// Builds a handler for `subscribe_to_output_pattern`: listens to
/// `session.output.<session_id>`, matches `regex` against the delta text
/// carried in the payload's `"delta"` field, and republishes a match under
/// `event_name`.
pub fn output_pattern_handler(bus: Arc<EventBus>, event_name: String, regex: Regex) -> Handler {
    Arc::new(move |event: Event| {
        let bus = Arc::clone(&bus);
        let event_name = event_name.clone();
        let regex = regex.clone();
        Box::pin(async move {
            let Some(delta) = event.payload.get("delta").and_then(Value::as_str) else { return };
            for line in delta.lines() {
                if let Some(m) = regex.find(line) {
                    bus.publish(
                        &event_name,
                        serde_json::json!({"session_id": event.payload.get("session_id"), "line": m.as_str()}),
                        Priority::Normal,
                    )
                    .await;
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SystemClock;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, Duration};

    fn bus() -> EventBus {
        EventBus::new(256, Arc::new(SystemClock::new()))
    }

    #[test]
    fn topic_matches_exact_and_prefix() {
        assert!(topic_matches("session.output", "session.output"));
        assert!(!topic_matches("session.output", "session.input"));
        assert!(topic_matches("session.*", "session.output"));
        assert!(topic_matches("session.*", "session"));
        assert!(!topic_matches("session.*", "sessionx"));
    }

    #[tokio::test]
    async fn subscriber_receives_matching_events_in_order() {
        let bus = Arc::new(bus());
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        bus.subscribe(
            "agent.task.*",
            Arc::new(move |e: Event| {
                let received = Arc::clone(&received_clone);
                Box::pin(async move {
                    received.lock().await.push(e.sequence_no);
                })
            }),
        )
        .await;

        bus.publish("agent.task.start", serde_json::json!({}), Priority::Normal).await;
        bus.publish("agent.task.complete", serde_json::json!({}), Priority::Normal).await;
        bus.publish("unrelated.topic", serde_json::json!({}), Priority::Normal).await;

        sleep(Duration::from_millis(50)).await;
        let got = received.lock().await.clone();
        assert_eq!(got, vec![0, 1]);
    }

    #[tokio::test]
    async fn history_returns_last_n_events() {
        let bus = bus();
        for i in 0..5 {
            bus.publish("t", serde_json::json!({"i": i}), Priority::Normal).await;
        }
        let hist = bus.history("t", 3).await;
        assert_eq!(hist.len(), 3);
        assert_eq!(hist[2].sequence_no, 4);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = Arc::new(bus());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let id = bus
            .subscribe(
                "t",
                Arc::new(move |_e: Event| {
                    let count = Arc::clone(&count_clone);
                    Box::pin(async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        bus.publish("t", serde_json::json!({}), Priority::Normal).await;
        sleep(Duration::from_millis(20)).await;
        bus.unsubscribe(id).await.unwrap();
        bus.publish("t", serde_json::json!({}), Priority::Normal).await;
        sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn output_pattern_handler_matches_delta() {
        let bus = Arc::new(bus());
        let regex = Regex::new("ERROR:.*").unwrap();
        let handler = output_pattern_handler(Arc::clone(&bus), "err".to_string(), regex);
        bus.subscribe("session.output.s1", handler).await;

        bus.publish(
            "session.output.s1",
            serde_json::json!({"session_id": "s1", "delta": "ok\nERROR: boom\n"}),
            Priority::Normal,
        )
        .await;

        sleep(Duration::from_millis(50)).await;
        let matched = bus.history("err", 10).await;
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].payload["line"], "ERROR: boom");
    }
}
