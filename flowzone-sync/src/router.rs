//! Inbound message routing.
//!
//! ```text
//!  Envelope ──► MessageRouter ─┬─ Full ──────────────► StateStore::install_full
//!                              ├─ LegacyDirect ──────► StateStore::install_full
//!                              ├─ Unrecognized (warn) ► StateStore::install_full
//!                              └─ Patch ─► patch::apply ─► StateStore::install_patched
//! ```
//!
//! A patch batch that arrives before any snapshot has nothing to apply to
//! and is dropped.

use std::sync::Arc;

use serde_json::Value;

use crate::diagnostics::{DiagnosticLog, LogCategory};
use crate::document::Document;
use crate::patch;
use crate::protocol::{Envelope, InboundMessage};
use crate::store::StateStore;

/// Default sampling interval for per-batch audio telemetry.
pub const DEFAULT_PATCH_SAMPLE_INTERVAL: u32 = 60;

/// Waveform samples above this count as signal.
const WAVEFORM_THRESHOLD: f64 = 0.001;

/// What the router did with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    InstalledFull { version: u64 },
    InstalledPatch { version: u64, applied: usize, skipped: usize },
    InstalledLegacy { version: u64 },
    InstalledUnrecognized { kind: String, version: u64 },
    /// A patch arrived before any snapshot; nothing was installed.
    PatchWithoutReplica { ops: usize },
}

impl RouteOutcome {
    /// Install counter after routing, if anything was installed.
    pub fn version(&self) -> Option<u64> {
        match self {
            Self::InstalledFull { version }
            | Self::InstalledPatch { version, .. }
            | Self::InstalledLegacy { version }
            | Self::InstalledUnrecognized { version, .. } => Some(*version),
            Self::PatchWithoutReplica { .. } => None,
        }
    }
}

/// Dispatches decoded messages to the store, through the patch engine when
/// needed.
pub struct MessageRouter {
    log: Arc<DiagnosticLog>,
    store: Arc<StateStore>,
    patch_sample_interval: u32,
}

impl MessageRouter {
    pub fn new(
        log: Arc<DiagnosticLog>,
        store: Arc<StateStore>,
        patch_sample_interval: u32,
    ) -> Self {
        Self {
            log,
            store,
            patch_sample_interval,
        }
    }

    /// Classify and route an already-parsed payload.
    pub fn route(&self, value: Value) -> RouteOutcome {
        self.route_envelope(Envelope::classify(value))
    }

    pub fn route_envelope(&self, envelope: Envelope) -> RouteOutcome {
        let Envelope {
            message,
            revision,
            rejected_ops,
        } = envelope;

        if let Some(revision) = revision {
            log::trace!("{} carries revision {revision}", message.label());
        }
        for rejected in &rejected_ops {
            self.log.log(
                LogCategory::State,
                format!("STATE_PATCH entry {} rejected: {}", rejected.index, rejected.reason),
            );
        }

        match message {
            InboundMessage::Full(document) => {
                self.log.log(
                    LogCategory::Audio,
                    format!("INITIAL {}", input_levels(&document, false)),
                );
                let version = self.store.install_full(document);
                RouteOutcome::InstalledFull { version }
            }
            InboundMessage::Patch(ops) => {
                let Some(current) = self.store.current() else {
                    self.log.log(
                        LogCategory::State,
                        format!("STATE_PATCH with {} ops before any snapshot, dropped", ops.len()),
                    );
                    return RouteOutcome::PatchWithoutReplica { ops: ops.len() };
                };

                let patched = patch::apply(&current, &ops);
                for skipped in &patched.skipped {
                    self.log.log(
                        LogCategory::State,
                        format!(
                            "patch op {} at {:?} skipped: {}",
                            skipped.index, skipped.path, skipped.error
                        ),
                    );
                }

                let applied = patched.applied(ops.len());
                let skipped = patched.skipped.len();
                let document = patched.document;
                self.log.log_sampled(
                    LogCategory::Audio,
                    "state_patch",
                    self.patch_sample_interval,
                    || input_levels(&document, true),
                );

                let version = self.store.install_patched(document);
                RouteOutcome::InstalledPatch {
                    version,
                    applied,
                    skipped,
                }
            }
            InboundMessage::LegacyDirect(document) => {
                let version = self.store.install_full(document);
                RouteOutcome::InstalledLegacy { version }
            }
            InboundMessage::Unrecognized { kind, payload } => {
                log::warn!("unrecognized message type {kind:?}, installing payload as replica");
                self.log.log(
                    LogCategory::State,
                    format!("unrecognized message type {kind}, installed as snapshot"),
                );
                let version = self.store.install_full(payload);
                RouteOutcome::InstalledUnrecognized { kind, version }
            }
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }
}

/// One-line summary of the live input meters in `document`.
fn input_levels(document: &Document, with_waveform: bool) -> String {
    let level = |path: &str| match document.pointer(path).and_then(|n| n.as_f64()) {
        Some(v) => format!("{v:.4}"),
        None => "n/a".to_string(),
    };

    let mut line = format!(
        "mic.inputLevel={} looper.inputLevel={}",
        level("/mic/inputLevel"),
        level("/looper/inputLevel")
    );
    if with_waveform {
        let non_zero = document
            .pointer("/looper/waveformData")
            .and_then(|n| n.as_array())
            .is_some_and(|samples| {
                samples
                    .iter()
                    .any(|s| s.as_f64().is_some_and(|v| v > WAVEFORM_THRESHOLD))
            });
        line.push_str(if non_zero {
            " waveformNonZero=YES"
        } else {
            " waveformNonZero=NO"
        });
    }
    line
}
