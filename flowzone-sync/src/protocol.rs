//! JSON wire protocol between the engine and the remote.
//!
//! Inbound (engine → remote), discriminated by `type`:
//! ```text
//! { "type": "STATE_FULL",  "revisionId": 7, "data": { …document… } }
//! { "type": "STATE_PATCH", "revisionId": 8, "ops": [ { "op", "path", "value"? }, … ] }
//! { …document… }                                  ← legacy, no discriminant
//! ```
//!
//! Outbound (remote → engine): free-form objects discriminated by `cmd`,
//! e.g. `{ "cmd": "NOTE_ON", "pad": 36, "val": 1.0 }`. [`Command`] covers
//! the gestures the remote knows about; the connection layer accepts any
//! `Serialize` value.
//!
//! `revisionId` is decoded for diagnostics only. Nothing here orders or
//! de-duplicates messages: a patch built against an older snapshot is
//! routed like any other.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::document::Document;
use crate::patch::PatchOp;

pub const STATE_FULL: &str = "STATE_FULL";
pub const STATE_PATCH: &str = "STATE_PATCH";

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Authoritative full snapshot.
    Full(Document),
    /// Ordered edit batch against the current replica.
    Patch(Vec<PatchOp>),
    /// Untyped payload: the payload is the document.
    LegacyDirect(Document),
    /// A `type` we do not handle, or a known `type` with a malformed body.
    Unrecognized { kind: String, payload: Document },
}

impl InboundMessage {
    /// Short label for diagnostics.
    pub fn label(&self) -> &str {
        match self {
            Self::Full(_) => STATE_FULL,
            Self::Patch(_) => STATE_PATCH,
            Self::LegacyDirect(_) => "DIRECT",
            Self::Unrecognized { kind, .. } => kind,
        }
    }
}

/// A patch entry that could not be decoded as an op.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedOp {
    pub index: usize,
    pub reason: String,
}

/// A decoded inbound message plus envelope metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message: InboundMessage,
    /// Engine-side revision stamp, when present.
    pub revision: Option<u64>,
    /// Patch entries dropped during decoding.
    pub rejected_ops: Vec<RejectedOp>,
}

impl Envelope {
    /// Classify an already-parsed payload. Never fails: anything that is
    /// not a well-formed `STATE_FULL`/`STATE_PATCH` is either legacy or
    /// unrecognized.
    pub fn classify(mut value: Value) -> Self {
        let revision = value.get("revisionId").and_then(Value::as_u64);
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        let mut rejected_ops = Vec::new();

        let message = match kind {
            None => InboundMessage::LegacyDirect(Document::from(value)),
            Some(kind) if kind == STATE_FULL && has_field(&value, "data", |d| !d.is_null()) => {
                InboundMessage::Full(Document::from(take_field(&mut value, "data")))
            }
            Some(kind) if kind == STATE_PATCH && has_field(&value, "ops", Value::is_array) => {
                let (ops, rejected) = decode_ops(take_field(&mut value, "ops"));
                rejected_ops = rejected;
                InboundMessage::Patch(ops)
            }
            Some(kind) => InboundMessage::Unrecognized {
                kind,
                payload: Document::from(value),
            },
        };

        Self {
            message,
            revision,
            rejected_ops,
        }
    }

    /// Parse and classify a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::Decode)?;
        Ok(Self::classify(value))
    }
}

fn has_field(value: &Value, key: &str, check: impl Fn(&Value) -> bool) -> bool {
    value.get(key).is_some_and(check)
}

fn take_field(value: &mut Value, key: &str) -> Value {
    value
        .as_object_mut()
        .and_then(|fields| fields.remove(key))
        .unwrap_or_default()
}

/// Decode patch entries one by one; a bad entry does not spoil the batch.
fn decode_ops(ops: Value) -> (Vec<PatchOp>, Vec<RejectedOp>) {
    let Value::Array(entries) = ops else {
        return (Vec::new(), Vec::new());
    };

    let mut decoded = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<PatchOp>(entry) {
            Ok(op) => decoded.push(op),
            Err(e) => rejected.push(RejectedOp {
                index,
                reason: e.to_string(),
            }),
        }
    }
    (decoded, rejected)
}

/// Outbound gesture commands understood by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    NoteOn { pad: u8, val: f64 },
    NoteOff { pad: u8 },
    SetBpm { bpm: f64 },
    TogglePlay,
    Pause,
    Panic,
    ToggleMetronome,
    SetLoopLength { bars: u32 },
    XyChange { x: f64, y: f64 },
    SetPreset { category: String, preset: String },
    SetMode { category: String },
    SetSlotVolume { slot: u32, volume: f64 },
    SelectSlot { slot: u32 },
    AdjustParam { param: i32, value: f64 },
    /// Input gain in dB.
    SetInputGain { val: f64 },
    ToggleMonitorInput,
    NewJam,
    LoadJam {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    RenameJam {
        #[serde(rename = "sessionId")]
        session_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emoji: Option<String>,
    },
    DeleteJam {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    LoadRiff {
        #[serde(rename = "riffId")]
        riff_id: String,
    },
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,
}
