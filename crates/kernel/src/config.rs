// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel-wide configuration, read from environment variables and CLI flags
//! covering persistence, dispatch concurrency, dedup, notifications, event
//! history, and logging.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "orchkernel", about = "Multi-agent terminal orchestration kernel")]
pub struct KernelConfig {
    /// Overrides the persistence directory. Defaults to `$HOME/.iterm_mcp_logs/`.
    #[arg(long, env = "ITERM_MCP_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Default screen-read cap when a session has none set.
    #[arg(long, env = "ITERM_MCP_DEFAULT_MAX_LINES", default_value = "1000")]
    pub default_max_lines: usize,

    /// Output Monitor poll interval, in milliseconds.
    #[arg(long, env = "ITERM_MCP_POLL_INTERVAL_MS", default_value = "250")]
    pub poll_interval_ms: u64,

    /// Dedup cache TTL, in seconds.
    #[arg(long, env = "ITERM_MCP_DEDUP_TTL_S", default_value = "300")]
    pub dedup_ttl_s: u64,

    /// Dedup cache maximum entries.
    #[arg(long, env = "ITERM_MCP_DEDUP_MAX", default_value = "1024")]
    pub dedup_max: usize,

    /// Dispatcher bounded-concurrency cap for parallel writes/reads.
    #[arg(long, env = "ORCH_DISPATCH_CONCURRENCY", default_value = "32")]
    pub dispatch_concurrency: usize,

    /// Per-agent notification ring buffer cap.
    #[arg(long, env = "ORCH_NOTIFY_MAX_PER_AGENT", default_value = "100")]
    pub notify_max_per_agent: usize,

    /// Global notification ring buffer cap.
    #[arg(long, env = "ORCH_NOTIFY_MAX_TOTAL", default_value = "1000")]
    pub notify_max_total: usize,

    /// Per-topic event history cap.
    #[arg(long, env = "ORCH_EVENT_HISTORY", default_value = "256")]
    pub event_history: usize,

    /// Log format: json or text.
    #[arg(long, env = "ORCH_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level.
    #[arg(long, env = "ORCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl KernelConfig {
    /// Resolve the persistence directory, applying the `$HOME`-relative
    /// default when `log_dir` was not set.
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            home.join(".iterm_mcp_logs")
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dedup_max == 0 {
            anyhow::bail!("ITERM_MCP_DEDUP_MAX must be greater than zero");
        }
        if self.dispatch_concurrency == 0 {
            anyhow::bail!("ORCH_DISPATCH_CONCURRENCY must be greater than zero");
        }
        Ok(())
    }
}
