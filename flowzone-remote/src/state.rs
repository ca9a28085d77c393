//! View summary: what the remote shows for the current replica.
//!
//! The replica is read through optional paths; anything the engine has not
//! sent yet falls back to the defaults the UI has always shown. Meter levels
//! are left out so the summary only changes on meaningful state.

use std::fmt;

use flowzone_sync::{ConnectionState, Document, Node, Replica};

const DEFAULT_BPM: f64 = 120.0;
const DEFAULT_INPUT_GAIN: f64 = 0.7;

/// One line of status output.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSummary {
    pub connection: ConnectionState,
    /// Whether any snapshot has arrived yet.
    pub synced: bool,
    pub bpm: f64,
    pub is_playing: bool,
    pub active_mode: Option<String>,
    pub slots: usize,
    pub riffs: usize,
    pub input_gain: f64,
}

impl ViewSummary {
    pub fn new(connection: ConnectionState, replica: Option<&Replica>) -> Self {
        let Some(replica) = replica else {
            return Self::empty(connection);
        };
        let doc = &replica.document;

        Self {
            connection,
            synced: true,
            bpm: number(doc, "/transport/bpm").unwrap_or(DEFAULT_BPM),
            is_playing: doc
                .pointer("/transport/isPlaying")
                .and_then(Node::as_bool)
                .unwrap_or(false),
            active_mode: doc
                .pointer("/activeMode/category")
                .and_then(Node::as_str)
                .map(str::to_owned),
            slots: count(doc, "/slots"),
            riffs: count(doc, "/riffHistory"),
            input_gain: number(doc, "/mic/inputGain").unwrap_or(DEFAULT_INPUT_GAIN),
        }
    }

    fn empty(connection: ConnectionState) -> Self {
        Self {
            connection,
            synced: false,
            bpm: DEFAULT_BPM,
            is_playing: false,
            active_mode: None,
            slots: 0,
            riffs: 0,
            input_gain: DEFAULT_INPUT_GAIN,
        }
    }
}

fn number(doc: &Document, path: &str) -> Option<f64> {
    doc.pointer(path).and_then(Node::as_f64)
}

fn count(doc: &Document, path: &str) -> usize {
    doc.pointer(path).and_then(Node::as_array).map_or(0, <[Node]>::len)
}

impl fmt::Display for ViewSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}{}] {:.1} bpm {} | mode {} | {} slots | {} riffs | gain {:.2}",
            self.connection,
            if self.synced { "" } else { ", no state yet" },
            self.bpm,
            if self.is_playing { "playing" } else { "stopped" },
            self.active_mode.as_deref().unwrap_or("-"),
            self.slots,
            self.riffs,
            self.input_gain,
        )
    }
}
