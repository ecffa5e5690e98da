//! Websocket session lifecycle.
//!
//! `WssSession` owns at most one receive loop task. `connect` returns only
//! after the handshake succeeded, so callers can emit immediately afterwards.
//! `destroy` requests a clean close and returns without waiting; `wait`
//! joins the loop and surfaces its error, if any.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use secrecy::ExposeSecret;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::auth::TokenStrategy;
use crate::stream::client::{
    open_socket, run_receive_loop, ship_stream_url, Socket, WssConnectionError,
};
use crate::stream::registry::EventRegistry;

/// Observable lifecycle state of a [`WssSession`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// No connection attempt made yet.
    Idle,
    /// Fetching a token and performing the handshake.
    Connecting,
    /// Handshake done; the receive loop is running.
    Connected,
    /// Close requested; waiting for the peer to acknowledge.
    Draining,
    /// The socket closed cleanly.
    Closed,
    /// Handshake, transport or frame decoding failed.
    Failed,
}

impl SessionState {
    /// Whether the session reached a final state for its current connection.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

type LoopTask = JoinHandle<Result<(), WssConnectionError>>;

#[derive(Default)]
struct Running {
    task: Option<LoopTask>,
    close_tx: Option<oneshot::Sender<()>>,
    ship_guid: Option<String>,
}

/// One websocket connection to a ship stream.
pub struct WssSession {
    base_url: String,
    tokens: Arc<TokenStrategy>,
    registry: Arc<EventRegistry>,
    state: Arc<watch::Sender<SessionState>>,
    running: Mutex<Running>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl WssSession {
    pub fn new(base_url: &str, tokens: Arc<TokenStrategy>, registry: Arc<EventRegistry>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            base_url: base_url.to_string(),
            tokens,
            registry,
            state: Arc::new(state),
            running: Mutex::new(Running::default()),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Ship of the current or most recent connection.
    pub fn ship_guid(&self) -> Option<String> {
        self.running().ship_guid.clone()
    }

    /// Whether a receive loop task exists and has not finished.
    pub fn is_running(&self) -> bool {
        self.running()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Opens the socket for `ship_guid` and starts the receive loop.
    ///
    /// Returns once the handshake completed. Calling this while a loop is
    /// already running is a no-op. Concurrent callers are serialized, so the
    /// second one observes the first connection.
    pub async fn connect(&self, ship_guid: &str) -> Result<(), WssConnectionError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_running() {
            debug!(event = "wss_already_connected", ship_guid = ?self.ship_guid());
            return Ok(());
        }

        self.state.send_replace(SessionState::Connecting);
        info!(event = "wss_connecting", base_url = %self.base_url, %ship_guid);

        let mut socket = match self.handshake(ship_guid).await {
            Ok(socket) => socket,
            Err(err) => {
                error!(event = "wss_connect_failed", %ship_guid, error = %err);
                self.state.send_replace(SessionState::Failed);
                return Err(err);
            }
        };

        let (close_tx, close_rx) = oneshot::channel();
        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.state);
        self.state.send_replace(SessionState::Connected);
        info!(event = "wss_connected", %ship_guid);

        let task_ship = ship_guid.to_string();
        let task = tokio::spawn(async move {
            let draining = Arc::clone(&state);
            let result = run_receive_loop(&mut socket, &registry, close_rx, move || {
                draining.send_replace(SessionState::Draining);
            })
            .await;
            match &result {
                Ok(()) => {
                    info!(event = "wss_session_closed", ship_guid = %task_ship);
                    state.send_replace(SessionState::Closed);
                }
                Err(err) => {
                    error!(event = "wss_session_failed", ship_guid = %task_ship, error = %err);
                    state.send_replace(SessionState::Failed);
                }
            }
            result
        });

        let mut running = self.running();
        running.task = Some(task);
        running.close_tx = Some(close_tx);
        running.ship_guid = Some(ship_guid.to_string());
        Ok(())
    }

    /// Requests a clean close without waiting for it. Safe to call repeatedly
    /// and before any `connect`.
    pub fn destroy(&self) {
        match self.running().close_tx.take() {
            Some(close_tx) => {
                if close_tx.send(()).is_ok() {
                    info!(event = "wss_close_sent");
                } else {
                    debug!(event = "wss_already_stopped");
                }
            }
            None => debug!(event = "wss_destroy_noop"),
        }
    }

    /// Waits for the receive loop to end and returns its result.
    ///
    /// Returns `Ok` immediately when no loop was started or it was already
    /// joined.
    pub async fn wait(&self) -> Result<(), WssConnectionError> {
        let task = self.running().task.take();
        let Some(task) = task else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(err) => {
                self.state.send_replace(SessionState::Failed);
                Err(WssConnectionError::WorkerStopped(err.to_string()))
            }
        }
    }

    async fn handshake(&self, ship_guid: &str) -> Result<Socket, WssConnectionError> {
        if ship_guid.trim().is_empty() {
            return Err(WssConnectionError::NoShip);
        }
        let token = self.tokens.token().await?;
        let url = ship_stream_url(&self.base_url, ship_guid, token.expose_secret());
        open_socket(&url).await
    }

    fn running(&self) -> MutexGuard<'_, Running> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WssSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WssSession")
            .field("base_url", &self.base_url)
            .field("state", &self.state())
            .field("ship_guid", &self.ship_guid())
            .finish()
    }
}

impl Drop for WssSession {
    fn drop(&mut self) {
        if let Some(close_tx) = self.running().close_tx.take() {
            let _ = close_tx.send(());
        }
    }
}
