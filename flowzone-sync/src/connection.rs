//! WebSocket transport lifecycle.
//!
//! ```text
//!          connect()
//!  Idle ─────────────► Connecting ──(open)──► Open
//!   ▲                     ▲                    │ close / error
//!   │ shutdown()          │ sleep(backoff)     ▼
//!   └──────────────── AwaitingRetry ◄──────────┘
//!                         ▲
//!                         └─── connect failed
//! ```
//!
//! One driver task owns the socket for the whole lifetime of the manager and
//! walks this state machine sequentially, so a retry can never race a live
//! transport. Outbound traffic is at-most-once: each open transport gets a
//! fresh outbound channel and anything sent while not `Open` is dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::diagnostics::{DiagnosticLog, LogCategory};
use crate::protocol::ProtocolError;

/// Engine endpoint used when nothing else is configured.
pub const DEFAULT_URL: &str = "ws://localhost:50001";

/// Characters of an inbound frame kept in its WS diagnostic.
const PREVIEW_CHARS: usize = 160;

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or shut down
    Idle,
    Connecting,
    Open,
    /// Waiting out the backoff delay before the next attempt
    AwaitingRetry,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::AwaitingRetry => "awaiting retry",
        })
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: String,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            backoff_floor: Duration::from_millis(1_000),
            backoff_ceiling: Duration::from_millis(30_000),
        }
    }
}

/// Exponential reconnect schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay the next retry will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay for this retry and double it (capped) for the next.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

/// Result of [`ConnectionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the open transport.
    Sent,
    /// No open transport; the command was discarded.
    Dropped,
}

/// Callback receiving every well-formed inbound JSON payload.
pub type MessageHandler = Box<dyn FnMut(Value) + Send>;

struct Shared {
    log: Arc<DiagnosticLog>,
    state: watch::Sender<ConnectionState>,
    backoff: Mutex<Backoff>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    handler: Mutex<Option<MessageHandler>>,
    /// Set by `shutdown`; a driver that has not yet observed its abort
    /// can no longer move the state machine.
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.publish(next);
    }

    fn publish(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            self.log.log(LogCategory::Ws, format!("state {prev} -> {next}"));
        }
    }

    fn dispatch(&self, text: &str) {
        self.log.log(
            LogCategory::Ws,
            format!("inbound ({} bytes) {}", text.len(), preview(text)),
        );

        let value: Value = match serde_json::from_str(text).map_err(ProtocolError::Decode) {
            Ok(value) => value,
            Err(e) => {
                self.log.log(LogCategory::Ws, format!("{e}; frame dropped"));
                return;
            }
        };

        if let Some(handler) = lock(&self.handler).as_mut() {
            handler(value);
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Owns the transport and its reconnect loop.
pub struct ConnectionManager {
    url: String,
    shared: Arc<Shared>,
    driver: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, log: Arc<DiagnosticLog>) -> Self {
        let shared = Arc::new(Shared {
            log,
            state: watch::Sender::new(ConnectionState::Idle),
            backoff: Mutex::new(Backoff::new(config.backoff_floor, config.backoff_ceiling)),
            outgoing: Mutex::new(None),
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        Self {
            url: config.url,
            shared,
            driver: None,
        }
    }

    /// Start the driver and route inbound payloads to `on_message`.
    ///
    /// Calling this while the driver is running only swaps the callback.
    /// Must be called from within a tokio runtime.
    pub fn connect<F>(&mut self, on_message: F)
    where
        F: FnMut(Value) + Send + 'static,
    {
        *lock(&self.shared.handler) = Some(Box::new(on_message));

        if self.driver.as_ref().is_some_and(|d| !d.is_finished()) {
            log::debug!("driver already running, message handler replaced");
            return;
        }

        self.shared.closed.store(false, Ordering::Release);
        self.shared.set_state(ConnectionState::Connecting);
        self.driver = Some(tokio::spawn(drive(self.url.clone(), self.shared.clone())));
    }

    /// Serialize `command` and hand it to the open transport.
    ///
    /// Returns [`Delivery::Dropped`] when no transport is open; only an
    /// encoding failure is an error.
    pub fn send<C>(&self, command: &C) -> Result<Delivery, ProtocolError>
    where
        C: Serialize + ?Sized,
    {
        let text = serde_json::to_string(command).map_err(ProtocolError::Encode)?;

        let outgoing = lock(&self.shared.outgoing);
        match outgoing.as_ref() {
            Some(tx) if self.state() == ConnectionState::Open => {
                if tx.send(text).is_ok() {
                    Ok(Delivery::Sent)
                } else {
                    log::debug!("transport closing, command dropped");
                    Ok(Delivery::Dropped)
                }
            }
            _ => {
                log::debug!("not connected ({}), command dropped: {text}", self.state());
                Ok(Delivery::Dropped)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connectivity changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Delay the next retry would wait.
    pub fn backoff_delay(&self) -> Duration {
        lock(&self.shared.backoff).current()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cancel the driver (and any pending retry) and return to `Idle`.
    pub fn shutdown(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        self.shared.closed.store(true, Ordering::Release);
        driver.abort();
        lock(&self.shared.outgoing).take();
        self.shared.publish(ConnectionState::Idle);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.url)
            .field("state", &self.state())
            .field("backoff", &self.backoff_delay())
            .finish()
    }
}

async fn drive(url: String, shared: Arc<Shared>) {
    loop {
        shared.set_state(ConnectionState::Connecting);

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                lock(&shared.backoff).reset();
                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&shared.outgoing) = Some(tx);
                shared.set_state(ConnectionState::Open);
                shared.log.log(LogCategory::Ws, format!("connected to {url}"));

                let reason = pump(stream, rx, &shared).await;

                lock(&shared.outgoing).take();
                shared.log.log(LogCategory::Ws, format!("disconnected: {reason}"));
            }
            Err(e) => {
                shared
                    .log
                    .log(LogCategory::Ws, format!("connect to {url} failed: {e}"));
            }
        }

        let delay = lock(&shared.backoff).next_delay();
        shared.set_state(ConnectionState::AwaitingRetry);
        shared.log.log(
            LogCategory::Ws,
            format!("reconnecting in {} ms", delay.as_millis()),
        );
        tokio::time::sleep(delay).await;
    }
}

/// Move frames until the transport goes away; returns why it did.
async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shared: &Shared,
) -> String {
    let (mut writer, mut reader) = stream.split();

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => shared.dispatch(text),
                    Err(_) => shared.log.log(
                        LogCategory::Ws,
                        format!("{}; frame dropped", ProtocolError::InvalidUtf8),
                    ),
                },
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => format!(
                            "closed by engine ({} {})",
                            u16::from(frame.code),
                            frame.reason.as_str()
                        ),
                        None => "closed by engine".to_string(),
                    };
                }
                // Pongs are queued by tungstenite while reading.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return format!("transport error: {e}"),
                None => return "stream ended".to_string(),
            },
            Some(text) = outbound.recv() => {
                if let Err(e) = writer.send(Message::Text(text.into())).await {
                    return format!("send failed: {e}");
                }
            }
        }
    }
}
