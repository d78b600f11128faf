// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fallback `TerminalDriver` used when `orchctl` is run without a real
//! terminal-emulator backend wired in. Every call succeeds and is logged;
//! screens always read back empty. Lets the façade and HTTP transport run
//! end-to-end for integration testing and local exploration without a real
//! terminal emulator behind it.

use std::sync::atomic::{AtomicU64, Ordering};

use orchkernel::driver::{BoxFuture, ColorUpdate, ScreenContents, SplitGeometry, TerminalDriver};
use orchkernel::error::KernelError;
use tracing::info;

pub struct NullTerminalDriver {
    next_handle: AtomicU64,
}

impl Default for NullTerminalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NullTerminalDriver {
    pub fn new() -> Self {
        Self { next_handle: AtomicU64::new(1) }
    }

    fn handle(&self) -> String {
        format!("null-{}", self.next_handle.fetch_add(1, Ordering::SeqCst))
    }
}

impl TerminalDriver for NullTerminalDriver {
    fn create(&self, name: &str, profile: Option<&str>) -> BoxFuture<'_, Result<String, KernelError>> {
        let handle = self.handle();
        let name = name.to_string();
        let profile = profile.map(str::to_string);
        Box::pin(async move {
            info!(name, profile, handle, "null driver: create");
            Ok(handle)
        })
    }

    fn split(
        &self,
        session: &str,
        geometry: SplitGeometry,
        profile: Option<&str>,
    ) -> BoxFuture<'_, Result<String, KernelError>> {
        let handle = self.handle();
        let session = session.to_string();
        let profile = profile.map(str::to_string);
        Box::pin(async move {
            info!(session, vertical = geometry.vertical, before = geometry.before, profile, handle, "null driver: split");
            Ok(handle)
        })
    }

    fn write(
        &self,
        session: &str,
        bytes: &[u8],
        execute_enter: bool,
        use_encoding: bool,
    ) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        let len = bytes.len();
        Box::pin(async move {
            info!(session, len, execute_enter, use_encoding, "null driver: write");
            Ok(())
        })
    }

    fn send_control(&self, session: &str, byte: u8) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            info!(session, byte, "null driver: send_control");
            Ok(())
        })
    }

    fn read_screen(&self, session: &str, max_lines: usize) -> BoxFuture<'_, Result<ScreenContents, KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            info!(session, max_lines, "null driver: read_screen");
            Ok(ScreenContents { lines: Vec::new(), overflowed: false })
        })
    }

    fn set_colors(&self, session: &str, update: ColorUpdate) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            info!(session, ?update, "null driver: set_colors");
            Ok(())
        })
    }

    fn set_badge(&self, session: &str, text: &str) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        let text = text.to_string();
        Box::pin(async move {
            info!(session, text, "null driver: set_badge");
            Ok(())
        })
    }

    fn focus(&self, session: &str) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            info!(session, "null driver: focus");
            Ok(())
        })
    }

    fn close(&self, session: &str) -> BoxFuture<'_, Result<(), KernelError>> {
        let session = session.to_string();
        Box::pin(async move {
            info!(session, "null driver: close");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_returns_distinct_handles() {
        let driver = NullTerminalDriver::new();
        let a = driver.create("s1", None).await.unwrap();
        let b = driver.create("s2", None).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn read_screen_is_always_empty() {
        let driver = NullTerminalDriver::new();
        let screen = driver.read_screen("s1", 100).await.unwrap();
        assert!(screen.lines.is_empty());
        assert!(!screen.overflowed);
    }
}
