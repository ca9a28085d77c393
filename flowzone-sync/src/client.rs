//! Remote client facade.
//!
//! Owns one of each sync component and wires them together:
//!
//! ```text
//!  engine ──ws──► ConnectionManager ──Value──► MessageRouter ──► StateStore ──watch──► UI
//!    ▲                   │                          │                 │
//!    └──── Command ──────┘                          └────► DiagnosticLog ◄┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState, Delivery};
use crate::diagnostics::{DiagnosticLog, DEFAULT_CAPACITY};
use crate::document::Document;
use crate::protocol::ProtocolError;
use crate::router::{MessageRouter, RouteOutcome, DEFAULT_PATCH_SAMPLE_INTERVAL};
use crate::store::{Replica, StateStore};

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    /// Diagnostic entries retained in memory.
    pub log_capacity: usize,
    /// Every Nth patch batch is summarized in the diagnostic log.
    pub patch_sample_interval: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            log_capacity: DEFAULT_CAPACITY,
            patch_sample_interval: DEFAULT_PATCH_SAMPLE_INTERVAL,
        }
    }
}

/// A remote for one engine.
///
/// Consumers read the replica through [`current`](Self::current) or
/// [`subscribe`](Self::subscribe) and push gestures through
/// [`send`](Self::send). Dropping the client stops the transport.
pub struct RemoteClient {
    log: Arc<DiagnosticLog>,
    store: Arc<StateStore>,
    router: Arc<MessageRouter>,
    connection: ConnectionManager,
}

impl RemoteClient {
    pub fn new(config: ClientConfig) -> Self {
        let log = Arc::new(DiagnosticLog::with_capacity(config.log_capacity));
        let store = Arc::new(StateStore::new(log.clone(), config.patch_sample_interval));
        let router = Arc::new(MessageRouter::new(
            log.clone(),
            store.clone(),
            config.patch_sample_interval,
        ));
        let connection = ConnectionManager::new(config.connection, log.clone());

        Self {
            log,
            store,
            router,
            connection,
        }
    }

    /// Start connecting. Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        let router = self.router.clone();
        self.connection.connect(move |value| {
            match router.route(value) {
                RouteOutcome::InstalledPatch { skipped: 0, .. } => {}
                outcome => log::debug!("routed: {outcome:?}"),
            }
        });
    }

    /// Send a command if the transport is open; dropped otherwise.
    pub fn send<C>(&self, command: &C) -> Result<Delivery, ProtocolError>
    where
        C: Serialize + ?Sized,
    {
        self.connection.send(command)
    }

    /// Current replica document, if one has been received.
    pub fn current(&self) -> Option<Document> {
        self.store.current()
    }

    pub fn replica(&self) -> Option<Replica> {
        self.store.replica()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Replica>> {
        self.store.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticLog> {
        &self.log
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Write the diagnostic log into `dir`.
    pub fn export_diagnostics(&self, dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
        self.log.export_to_dir(dir)
    }

    /// Stop the transport and any pending reconnect.
    pub fn shutdown(&mut self) {
        self.connection.shutdown();
    }
}
