//! Bounded diagnostic log shared by every sync component.
//!
//! ```text
//!  ConnectionManager ──┐
//!  MessageRouter ──────┼──► DiagnosticLog ──► ring buffer (FIFO, 500)
//!  StateStore ─────────┘          │
//!                                 └──► `log` facade (live console)
//! ```
//!
//! The log is an explicitly constructed service: the owner (normally the
//! [`RemoteClient`](crate::client::RemoteClient)) creates one and hands out
//! `Arc<DiagnosticLog>` clones. Entries are immutable once appended; when the
//! buffer is full the oldest entry is evicted.
//!
//! High-frequency events (per-frame input levels, patch batches) go through
//! [`DiagnosticLog::log_sampled`], which only records every Nth call per key.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};

/// Default number of retained entries.
pub const DEFAULT_CAPACITY: usize = 500;

/// Facade target used when mirroring entries to the console.
const LOG_TARGET: &str = "flowzone";

/// Diagnostic category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Transport lifecycle and raw traffic
    Ws,
    /// Audio telemetry carried in the replica (levels, waveform)
    Audio,
    /// Replica installs and patch outcomes
    State,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ws => "WS",
            Self::Audio => "AUDIO",
            Self::State => "STATE",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single retained log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEntry {
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub message: String,
}

impl DiagnosticEntry {
    /// Render as `timestamp [CATEGORY] message`.
    pub fn to_line(&self) -> String {
        format!(
            "{} [{}] {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.category,
            self.message
        )
    }
}

struct Inner {
    entries: VecDeque<DiagnosticEntry>,
    /// Per-key sampling counters; live for the lifetime of the log.
    counters: HashMap<String, u32>,
}

/// Fixed-capacity FIFO of diagnostic entries.
pub struct DiagnosticLog {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl DiagnosticLog {
    /// Create a log retaining [`DEFAULT_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a log retaining at most `capacity` entries (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                counters: HashMap::new(),
            }),
        }
    }

    // A panic while holding the lock cannot leave the buffer half-written,
    // so a poisoned mutex is still safe to read.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry, evicting the oldest one when full, and mirror it to
    /// the console sink.
    pub fn log(&self, category: LogCategory, message: impl Into<String>) {
        let message = message.into();
        log::info!(target: LOG_TARGET, "[FlowZone:{category}] {message}");

        let entry = DiagnosticEntry {
            timestamp: Utc::now(),
            category,
            message,
        };

        let mut inner = self.lock();
        if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(entry);
    }

    /// Record only every `interval`-th call for `key`.
    ///
    /// The counter for `key` is incremented on each call; when it reaches
    /// `interval` it is reset to zero and the message is logged. `message`
    /// is only evaluated on the calls that actually log. Returns whether an
    /// entry was recorded.
    pub fn log_sampled<F>(
        &self,
        category: LogCategory,
        key: &str,
        interval: u32,
        message: F,
    ) -> bool
    where
        F: FnOnce() -> String,
    {
        let due = {
            let mut inner = self.lock();
            let counter = inner.counters.entry(key.to_string()).or_insert(0);
            *counter += 1;
            if *counter >= interval {
                *counter = 0;
                true
            } else {
                false
            }
        };

        if due {
            self.log(category, message());
        }
        due
    }

    /// Serialize all retained entries as newline-delimited text.
    pub fn export(&self) -> String {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .map(DiagnosticEntry::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write [`export`](Self::export) to `flowzone_frontend_<timestamp>.log`
    /// inside `dir` and return the written path.
    pub fn export_to_dir(&self, dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
        let stamp = Utc::now()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        let path = dir.as_ref().join(format!("flowzone_frontend_{stamp}.log"));
        std::fs::write(&path, self.export())?;
        Ok(path)
    }

    /// Copy of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DiagnosticLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
