// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification Ring Buffer (component G): bounded per-agent and global
//! deques of status entries. Updates are serialized with a mutex; reads
//! return a consistent snapshot copy.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::id::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
    Success,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub agent: Option<String>,
    pub level: Level,
    pub summary: String,
    pub context: Option<String>,
    pub action_hint: Option<String>,
    pub created_at: u64,
}

pub struct NotificationBuffer {
    global: Mutex<VecDeque<Notification>>,
    per_agent: Mutex<HashMap<String, VecDeque<Notification>>>,
    max_total: usize,
    max_per_agent: usize,
    clock: Arc<dyn Clock>,
}

impl NotificationBuffer {
    pub fn new(max_total: usize, max_per_agent: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            global: Mutex::new(VecDeque::new()),
            per_agent: Mutex::new(HashMap::new()),
            max_total,
            max_per_agent,
            clock,
        }
    }

    pub async fn add(
        &self,
        agent: Option<String>,
        level: Level,
        summary: String,
        context: Option<String>,
        action_hint: Option<String>,
    ) -> Notification {
        let notification = Notification {
            agent: agent.clone(),
            level,
            summary,
            context,
            action_hint,
            created_at: self.clock.now_utc(),
        };

        {
            let mut global = self.global.lock().await;
            global.push_back(notification.clone());
            while global.len() > self.max_total {
                global.pop_front();
            }
        }

        if let Some(agent) = agent {
            let mut per_agent = self.per_agent.lock().await;
            let deque = per_agent.entry(agent).or_default();
            deque.push_back(notification.clone());
            while deque.len() > self.max_per_agent {
                deque.pop_front();
            }
        }

        notification
    }

    pub async fn get(&self, level: Option<Level>, agent: Option<&str>, limit: usize) -> Vec<Notification> {
        let items: Vec<Notification> = if let Some(agent) = agent {
            let per_agent = self.per_agent.lock().await;
            per_agent.get(agent).cloned().unwrap_or_default().into_iter().collect()
        } else {
            self.global.lock().await.iter().cloned().collect()
        };

        items
            .into_iter()
            .filter(|n| level.map_or(true, |l| n.level == l))
            .rev()
            .take(limit)
            .rev()
            .collect()
    }

    /// Most recent notification per agent that has at least one.
    pub async fn latest_per_agent(&self) -> HashMap<String, Notification> {
        let per_agent = self.per_agent.lock().await;
        per_agent.iter().filter_map(|(k, v)| v.back().map(|n| (k.clone(), n.clone()))).collect()
    }

    pub async fn clear(&self, agent: Option<&str>) {
        match agent {
            Some(agent) => {
                self.per_agent.lock().await.remove(agent);
            }
            None => {
                self.global.lock().await.clear();
                self.per_agent.lock().await.clear();
            }
        }
    }
}

/// Pure formatting helper: one line per agent, for status summaries.
pub fn format_agent_line(agent: &str, notification: &Notification) -> String {
    format!("[{:?}] {agent}: {}", notification.level, notification.summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SystemClock;

    fn buf(max_total: usize, max_per_agent: usize) -> NotificationBuffer {
        NotificationBuffer::new(max_total, max_per_agent, Arc::new(SystemClock::new()))
    }

    #[tokio::test]
    async fn per_agent_buffer_evicts_oldest_past_cap() {
        let buffer = buf(1000, 2);
        for i in 0..3 {
            buffer.add(Some("alice".into()), Level::Info, format!("n{i}"), None, None).await;
        }
        let items = buffer.get(None, Some("alice"), 10).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].summary, "n1");
        assert_eq!(items[1].summary, "n2");
    }

    #[tokio::test]
    async fn global_buffer_evicts_oldest_past_cap() {
        let buffer = buf(2, 1000);
        buffer.add(None, Level::Info, "a".into(), None, None).await;
        buffer.add(None, Level::Info, "b".into(), None, None).await;
        buffer.add(None, Level::Info, "c".into(), None, None).await;
        let items = buffer.get(None, None, 10).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].summary, "b");
    }

    #[tokio::test]
    async fn filters_by_level() {
        let buffer = buf(100, 100);
        buffer.add(Some("alice".into()), Level::Info, "info".into(), None, None).await;
        buffer.add(Some("alice".into()), Level::Error, "err".into(), None, None).await;
        let errors = buffer.get(Some(Level::Error), Some("alice"), 10).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].summary, "err");
    }

    #[tokio::test]
    async fn latest_per_agent_returns_most_recent() {
        let buffer = buf(100, 100);
        buffer.add(Some("alice".into()), Level::Info, "a1".into(), None, None).await;
        buffer.add(Some("alice".into()), Level::Info, "a2".into(), None, None).await;
        let latest = buffer.latest_per_agent().await;
        assert_eq!(latest.get("alice").unwrap().summary, "a2");
    }

    #[tokio::test]
    async fn clear_removes_agent_only_when_specified() {
        let buffer = buf(100, 100);
        buffer.add(Some("alice".into()), Level::Info, "a1".into(), None, None).await;
        buffer.add(Some("bob".into()), Level::Info, "b1".into(), None, None).await;
        buffer.clear(Some("alice")).await;
        assert!(buffer.get(None, Some("alice"), 10).await.is_empty());
        assert_eq!(buffer.get(None, Some("bob"), 10).await.len(), 1);
    }
}
