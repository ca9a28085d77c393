//! The client-side replica.
//!
//! `StateStore` is the only place a replica is installed. Both install paths
//! replace the held document wholesale; there is no merge and no schema
//! validation. Consumers either poll [`StateStore::current`] or watch
//! [`StateStore::subscribe`] and re-render on change. A [`Replica`] handed
//! out is a frozen snapshot: later installs never alter it, so readers
//! should re-read after each change rather than keep references into an
//! old tree.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::diagnostics::{DiagnosticLog, LogCategory};
use crate::document::Document;

/// How the current replica was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallKind {
    /// Full snapshot from the engine (typed or legacy).
    Full,
    /// Patch engine output applied to the previous replica.
    Patched,
}

impl fmt::Display for InstallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Patched => "patched",
        })
    }
}

/// A published replica snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Replica {
    pub document: Document,
    /// Local install counter, starting at 1. Not an engine revision.
    pub version: u64,
    pub kind: InstallKind,
}

/// Holder of the last-known-good replica.
pub struct StateStore {
    replica: watch::Sender<Option<Replica>>,
    log: Arc<DiagnosticLog>,
    /// Every Nth patched install is recorded in the diagnostic log.
    patch_sample_interval: u32,
}

impl StateStore {
    pub fn new(log: Arc<DiagnosticLog>, patch_sample_interval: u32) -> Self {
        Self {
            replica: watch::Sender::new(None),
            log,
            patch_sample_interval,
        }
    }

    /// Install a full snapshot.
    pub fn install_full(&self, document: Document) -> u64 {
        let keys = document.top_level_keys().join(",");
        let version = self.install(document, InstallKind::Full);
        self.log.log(
            LogCategory::State,
            format!("replica v{version} installed from snapshot, keys={keys}"),
        );
        version
    }

    /// Install the result of applying a patch batch to the current replica.
    pub fn install_patched(&self, document: Document) -> u64 {
        let version = self.install(document, InstallKind::Patched);
        self.log.log_sampled(
            LogCategory::State,
            "replica_patched",
            self.patch_sample_interval,
            || format!("replica v{version} installed from patch"),
        );
        version
    }

    fn install(&self, document: Document, kind: InstallKind) -> u64 {
        let mut version = 0;
        self.replica.send_modify(|slot| {
            version = slot.as_ref().map_or(0, |r| r.version) + 1;
            *slot = Some(Replica {
                document,
                version,
                kind,
            });
        });
        version
    }

    /// Current replica document, if one has been received.
    pub fn current(&self) -> Option<Document> {
        self.replica.borrow().as_ref().map(|r| r.document.clone())
    }

    /// Current replica with its install metadata.
    pub fn replica(&self) -> Option<Replica> {
        self.replica.borrow().clone()
    }

    /// Watch for installs.
    pub fn subscribe(&self) -> watch::Receiver<Option<Replica>> {
        self.replica.subscribe()
    }

    /// Number of installs so far (0 before the first snapshot).
    pub fn version(&self) -> u64 {
        self.replica.borrow().as_ref().map_or(0, |r| r.version)
    }

    pub fn last_install(&self) -> Option<InstallKind> {
        self.replica.borrow().as_ref().map(|r| r.kind)
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("version", &self.version())
            .field("last_install", &self.last_install())
            .finish()
    }
}
