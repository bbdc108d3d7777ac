//! Session state shared between the controller and its observers.
//!
//! The session controller is the only writer. The scheduler and the
//! publication engine read the current state or wait for changes.

use std::fmt;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Shutting down. Never left once entered.
    Terminating,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn is_terminating(&self) -> bool {
        matches!(self, SessionState::Terminating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Terminating => "Terminating",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable handle over a `watch` channel holding the [`SessionState`].
#[derive(Debug, Clone)]
pub struct SessionStateHandle {
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionStateHandle {
    /// Starts in `Disconnected`.
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        Self { state_tx, state_rx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn current(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Moves to `state` and returns the state it replaced. Once
    /// `Terminating`, the state stays put and `Terminating` is returned.
    pub fn set(&self, state: SessionState) -> SessionState {
        let mut previous = state;
        self.state_tx.send_if_modified(|current| {
            previous = *current;
            if current.is_terminating() || *current == state {
                return false;
            }
            *current = state;
            true
        });
        if previous != state && !previous.is_terminating() {
            debug!("Session state changed: {} -> {}", previous, state);
        }
        previous
    }

    /// Resolves `true` once connected, `false` if cancelled or terminating
    /// first.
    pub async fn wait_until_connected(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_connected() {
                return true;
            }
            if state.is_terminating() {
                return false;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

impl Default for SessionStateHandle {
    fn default() -> Self {
        Self::new()
    }
}
