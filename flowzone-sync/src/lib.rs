//! # flowzone-sync: replicated engine state for FlowZone remotes
//!
//! Keeps a local mirror of the audio engine's state over an unreliable,
//! reconnecting WebSocket, applying incremental patches as they stream in.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   JSON text    ┌───────────────────┐
//! │ FlowZone     │ ◄────────────► │ ConnectionManager │ backoff 1s → 30s
//! │ engine       │   frames       └─────────┬─────────┘
//! └──────────────┘                          │ serde_json::Value
//!                                           ▼
//!                                 ┌───────────────────┐
//!                                 │ MessageRouter     │
//!                                 └──┬─────────────┬──┘
//!                     STATE_FULL /   │             │ STATE_PATCH
//!                     legacy         │             ▼
//!                                    │     ┌──────────────┐
//!                                    │     │ patch::apply │
//!                                    ▼     └──────┬───────┘
//!                                 ┌───────────────▼───┐
//!                                 │ StateStore        │ ──watch──► consumers
//!                                 └───────────────────┘
//! ```
//!
//! Every component records into one shared [`DiagnosticLog`].
//!
//! ## Modules
//!
//! - [`diagnostics`]: bounded, sampled diagnostic ring with text export
//! - [`document`]: persistent replica tree (`Arc`-shared containers)
//! - [`patch`]: add / replace / remove edit application
//! - [`protocol`]: inbound envelope classification and outbound commands
//! - [`store`]: the replica holder
//! - [`router`]: inbound dispatch
//! - [`connection`]: transport lifecycle and reconnect backoff
//! - [`client`]: [`RemoteClient`] wiring it all together

pub mod client;
pub mod connection;
pub mod diagnostics;
pub mod document;
pub mod patch;
pub mod protocol;
pub mod router;
pub mod store;

// Re-exports for convenience
pub use client::{ClientConfig, RemoteClient};
pub use connection::{Backoff, ConnectionConfig, ConnectionManager, ConnectionState, Delivery};
pub use diagnostics::{DiagnosticEntry, DiagnosticLog, LogCategory};
pub use document::{Document, Node};
pub use patch::{OpKind, PatchError, PatchOp, Patched, SkippedOp};
pub use protocol::{Command, Envelope, InboundMessage, ProtocolError};
pub use router::{MessageRouter, RouteOutcome};
pub use store::{InstallKind, Replica, StateStore};
