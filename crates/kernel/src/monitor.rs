// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output Monitor (component L): per-session polling loop that diffs the
//! driver's screen against the previous snapshot and publishes the
//! appended text on the Event Bus. Stopping a session's monitor is
//! asynchronous: it waits for the in-flight poll to finish before the
//! loop exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::TerminalDriver;
use crate::event::{EventBus, Priority};

struct MonitorHandle {
    stop: CancellationToken,
    /// Flips to `true` once the loop has exited. A plain bool flag (rather
    /// than `Notify::notify_waiters`) so `stop()` can't race a loop that
    /// finishes and signals before `stop()` starts awaiting it.
    stopped: watch::Receiver<bool>,
}

pub struct OutputMonitor {
    driver: Arc<dyn TerminalDriver>,
    events: Arc<EventBus>,
    poll_interval: Duration,
    handles: Mutex<HashMap<String, MonitorHandle>>,
}

impl OutputMonitor {
    pub fn new(driver: Arc<dyn TerminalDriver>, events: Arc<EventBus>, poll_interval_ms: u64) -> Self {
        Self { driver, events, poll_interval: Duration::from_millis(poll_interval_ms), handles: Mutex::new(HashMap::new()) }
    }

    /// Starts polling `session_id`, reading up to `max_lines` per poll.
    /// Idempotent: calling this again for an already-monitored session
    /// restarts the loop with the new line cap.
    pub async fn start(&self, session_id: &str, max_lines: usize) {
        self.stop(session_id).await;

        let stop = CancellationToken::new();
        let (stopped_tx, stopped_rx) = watch::channel(false);
        self.handles.lock().await.insert(session_id.to_string(), MonitorHandle { stop: stop.clone(), stopped: stopped_rx });

        let driver = Arc::clone(&self.driver);
        let events = Arc::clone(&self.events);
        let poll_interval = self.poll_interval;
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let mut previous_lines: Vec<String> = Vec::new();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }

                let screen = match driver.read_screen(&session_id, max_lines).await {
                    Ok(s) => s,
                    Err(e) => {
                        debug!(session_id = %session_id, error = %e, "output monitor poll failed");
                        continue;
                    }
                };

                let common_prefix = previous_lines.iter().zip(screen.lines.iter()).take_while(|(a, b)| a == b).count();
                let appended: Vec<&String> = if common_prefix == previous_lines.len() {
                    screen.lines[common_prefix..].iter().collect()
                } else {
                    screen.lines.iter().collect()
                };

                if !appended.is_empty() || screen.overflowed {
                    let delta = appended.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("\n");
                    events
                        .publish(
                            &format!("session.output.{session_id}"),
                            serde_json::json!({"session_id": session_id, "delta": delta, "overflow": screen.overflowed}),
                            Priority::Normal,
                        )
                        .await;
                }

                previous_lines = screen.lines;
            }
            let _ = stopped_tx.send(true);
        });
    }

    /// Stops monitoring `session_id`, awaiting the in-flight poll's
    /// completion before returning. A no-op if the session isn't monitored.
    pub async fn stop(&self, session_id: &str) {
        let handle = self.handles.lock().await.remove(session_id);
        if let Some(mut handle) = handle {
            handle.stop.cancel();
            if *handle.stopped.borrow() {
                return;
            }
            let _ = handle.stopped.changed().await;
        }
    }

    pub async fn is_monitoring(&self, session_id: &str) -> bool {
        self.handles.lock().await.contains_key(session_id)
    }

    /// Stops every active monitor, used during façade shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.handles.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }
}
