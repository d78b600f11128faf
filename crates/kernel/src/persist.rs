// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only line-delimited persistence log (component B).
//!
//! Each of `agents`, `teams`, `managers`, `notifications`, `feedback` is a
//! newline-delimited JSON file under the log directory; each line is a
//! self-contained record, appended and fsynced individually. `persistent_sessions`
//! is a single JSON array, rewritten atomically (write-temp + rename) since its
//! whole state is small and always held in memory.
//!
//! A write failure never panics: it's converted to `KernelError::PersistenceError`,
//! logged, and the in-memory state stays authoritative.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::KernelError;

/// Which append-only log file a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFile {
    Agents,
    Teams,
    Managers,
    Notifications,
    Feedback,
}

impl LogFile {
    fn file_name(self) -> &'static str {
        match self {
            Self::Agents => "agents",
            Self::Teams => "teams",
            Self::Managers => "managers",
            Self::Notifications => "notifications",
            Self::Feedback => "feedback",
        }
    }
}

/// Envelope every persisted record carries, regardless of file.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Envelope<T> {
    pub kind: String,
    pub version: u32,
    #[serde(flatten)]
    pub data: T,
    pub created_at: u64,
    pub updated_at: u64,
}

/// The persistence log. Reads happen once at startup; writes append or
/// atomically replace, never partially.
pub struct PersistenceLog {
    base_dir: PathBuf,
}

impl PersistenceLog {
    /// `base_dir` defaults to `$HOME/.iterm_mcp_logs/` but is overridable
    /// (see `config::KernelConfig`).
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, KernelError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| KernelError::PersistenceError {
            path: base_dir.display().to_string(),
            kind: e.to_string(),
        })?;
        Ok(Self { base_dir })
    }

    fn path(&self, file: LogFile) -> PathBuf {
        self.base_dir.join(file.file_name())
    }

    /// Append one record as a single newline-terminated JSON line, fsyncing
    /// before returning so the write is durable.
    pub fn append<T: Serialize>(&self, file: LogFile, record: &Envelope<T>) -> Result<(), KernelError> {
        let path = self.path(file);
        let line = serde_json::to_string(record).map_err(|e| KernelError::InternalError {
            code: format!("serialize {file:?}: {e}"),
        })?;

        let result = (|| -> std::io::Result<()> {
            let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(f, "{line}")?;
            f.sync_all()?;
            Ok(())
        })();

        result.map_err(|e| {
            warn!(path = %path.display(), error = %e, "persistence append failed");
            KernelError::PersistenceError { path: path.display().to_string(), kind: e.to_string() }
        })
    }

    /// Read every well-formed record in a log file. Malformed lines are
    /// skipped with a warning rather than aborting startup.
    pub fn read_all<T: DeserializeOwned>(&self, file: LogFile) -> Vec<Envelope<T>> {
        let path = self.path(file);
        let Ok(f) = File::open(&path) else { return Vec::new() };
        let reader = BufReader::new(f);
        let mut out = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Envelope<T>>(&line) {
                Ok(rec) => out.push(rec),
                Err(e) => warn!(path = %path.display(), line = i, error = %e, "skipping malformed record"),
            }
        }
        out
    }

    /// Replay-and-rewrite compaction: the caller supplies the logical state
    /// (already deduplicated by primary key) and it's written out atomically,
    /// replacing the append log with the minimal set of current records.
    pub fn compact<T: Serialize>(&self, file: LogFile, records: &[Envelope<T>]) -> Result<(), KernelError> {
        let path = self.path(file);
        let tmp = path.with_extension("tmp");
        let result = (|| -> std::io::Result<()> {
            let mut f = File::create(&tmp)?;
            for rec in records {
                let line = serde_json::to_string(rec)?;
                writeln!(f, "{line}")?;
            }
            f.sync_all()?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })();

        result.map_err(|e| {
            warn!(path = %path.display(), error = %e, "persistence compaction failed");
            KernelError::PersistenceError { path: path.display().to_string(), kind: e.to_string() }
        })
    }

    /// Atomically rewrite the whole `persistent_sessions` JSON array.
    pub fn write_sessions_snapshot<T: Serialize>(&self, records: &[T]) -> Result<(), KernelError> {
        let path = self.base_dir.join("persistent_sessions");
        let tmp = path.with_extension("tmp");
        let result = (|| -> std::io::Result<()> {
            let json = serde_json::to_vec_pretty(records)?;
            fs::write(&tmp, json)?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })();

        result.map_err(|e| {
            warn!(path = %path.display(), error = %e, "session snapshot write failed");
            KernelError::PersistenceError { path: path.display().to_string(), kind: e.to_string() }
        })
    }

    /// Read the `persistent_sessions` JSON array, or an empty vec if absent.
    pub fn read_sessions_snapshot<T: DeserializeOwned>(&self) -> Vec<T> {
        let path = self.base_dir.join("persistent_sessions");
        let Ok(bytes) = fs::read(&path) else { return Vec::new() };
        serde_json::from_slice(&bytes).unwrap_or_default()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Dummy {
        name: String,
    }

    fn env(name: &str, t: u64) -> Envelope<Dummy> {
        Envelope { kind: "agent".into(), version: 1, data: Dummy { name: name.into() }, created_at: t, updated_at: t }
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = PersistenceLog::new(dir.path()).unwrap();
        log.append(LogFile::Agents, &env("alice", 1)).unwrap();
        log.append(LogFile::Agents, &env("bob", 2)).unwrap();

        let all: Vec<Envelope<Dummy>> = log.read_all(LogFile::Agents);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].data.name, "alice");
        assert_eq!(all[1].data.name, "bob");
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log = PersistenceLog::new(dir.path()).unwrap();
        log.append(LogFile::Agents, &env("alice", 1)).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(dir.path().join("agents")).unwrap();
            writeln!(f, "not json").unwrap();
        }
        log.append(LogFile::Agents, &env("bob", 2)).unwrap();

        let all: Vec<Envelope<Dummy>> = log.read_all(LogFile::Agents);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn compaction_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let log = PersistenceLog::new(dir.path()).unwrap();
        log.append(LogFile::Agents, &env("alice", 1)).unwrap();
        log.append(LogFile::Agents, &env("alice", 2)).unwrap();
        log.append(LogFile::Agents, &env("bob", 1)).unwrap();

        log.compact(LogFile::Agents, &[env("alice", 2), env("bob", 1)]).unwrap();

        let all: Vec<Envelope<Dummy>> = log.read_all(LogFile::Agents);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn sessions_snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = PersistenceLog::new(dir.path()).unwrap();
        log.write_sessions_snapshot(&[Dummy { name: "s1".into() }]).unwrap();
        let back: Vec<Dummy> = log.read_sessions_snapshot();
        assert_eq!(back, vec![Dummy { name: "s1".into() }]);
    }
}
