// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `TerminalDriver` used by this crate's own tests and available
//! to downstream integrators wiring up façade-level tests without a real
//! terminal emulator behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::driver::{BoxFuture, Color, ColorUpdate, ScreenContents, SplitGeometry, TerminalDriver};
use crate::error::KernelError;

#[derive(Debug, Clone, Default)]
pub struct RecordedWrite {
    pub session: String,
    pub content: String,
    pub execute_enter: bool,
}

/// Records every call it receives and answers `read_screen` from
/// caller-seeded buffers (`seed_screen`). Never touches a real terminal.
pub struct RecordingDriver {
    next_handle: AtomicU64,
    write_count: AtomicUsize,
    writes: Mutex<Vec<RecordedWrite>>,
    screens: Mutex<HashMap<String, ScreenContents>>,
    colors: Mutex<HashMap<String, ColorUpdate>>,
    badges: Mutex<HashMap<String, String>>,
    focused: Mutex<Option<String>>,
    closed: Mutex<Vec<String>>,
    controls: Mutex<Vec<(String, u8)>>,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            write_count: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            screens: Mutex::new(HashMap::new()),
            colors: Mutex::new(HashMap::new()),
            badges: Mutex::new(HashMap::new()),
            focused: Mutex::new(None),
            closed: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
        }
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().expect("writes mutex poisoned").clone()
    }

    pub fn is_closed(&self, session: &str) -> bool {
        self.closed.lock().expect("closed mutex poisoned").iter().any(|s| s == session)
    }

    pub fn badge_of(&self, session: &str) -> Option<String> {
        self.badges.lock().expect("badges mutex poisoned").get(session).cloned()
    }

    pub fn focused_session(&self) -> Option<String> {
        self.focused.lock().expect("focused mutex poisoned").clone()
    }

    /// Seeds what the next `read_screen` call for `session` returns.
    pub fn seed_screen(&self, session: &str, lines: Vec<String>, overflowed: bool) {
        self.screens
            .lock()
            .expect("screens mutex poisoned")
            .insert(session.to_string(), ScreenContents { lines, overflowed });
    }
}

impl TerminalDriver for RecordingDriver {
    fn create(&self, _name: &str, _profile: Option<&str>) -> BoxFuture<'_, Result<String, KernelError>> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(format!("live-{handle}")) })
    }

    fn split(
        &self,
        _session: &str,
        _geometry: SplitGeometry,
        _profile: Option<&str>,
    ) -> BoxFuture<'_, Result<String, KernelError>> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(format!("live-{handle}")) })
    }

    fn write(
        &self,
        session: &str,
        bytes: &[u8],
        execute_enter: bool,
        _use_encoding: bool,
    ) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        let content = String::from_utf8_lossy(bytes).to_string();
        Box::pin(async move {
            self.write_count.fetch_add(1, Ordering::SeqCst);
            self.writes.lock().expect("writes mutex poisoned").push(RecordedWrite {
                session,
                content,
                execute_enter,
            });
            Ok(())
        })
    }

    fn send_control(&self, session: &str, byte: u8) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            self.controls.lock().expect("controls mutex poisoned").push((session, byte));
            Ok(())
        })
    }

    fn read_screen(&self, session: &str, max_lines: usize) -> BoxFuture<'_, Result<ScreenContents, KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            let screens = self.screens.lock().expect("screens mutex poisoned");
            match screens.get(&session) {
                Some(s) => {
                    let start = s.lines.len().saturating_sub(max_lines);
                    Ok(ScreenContents { lines: s.lines[start..].to_vec(), overflowed: s.overflowed })
                }
                None => Ok(ScreenContents { lines: Vec::new(), overflowed: false }),
            }
        })
    }

    fn set_colors(&self, session: &str, update: ColorUpdate) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            self.colors.lock().expect("colors mutex poisoned").insert(session, update);
            Ok(())
        })
    }

    fn set_badge(&self, session: &str, text: &str) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        let text = text.to_string();
        Box::pin(async move {
            self.badges.lock().expect("badges mutex poisoned").insert(session, text);
            Ok(())
        })
    }

    fn focus(&self, session: &str) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            *self.focused.lock().expect("focused mutex poisoned") = Some(session);
            Ok(())
        })
    }

    fn close(&self, session: &str) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            self.closed.lock().expect("closed mutex poisoned").push(session);
            Ok(())
        })
    }
}

/// Sentinel color used only by tests that need a concrete `Color` value.
pub fn sample_color() -> Color {
    Color { red: 10, green: 20, blue: 30 }
}
