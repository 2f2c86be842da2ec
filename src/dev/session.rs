//! Lifetime of one `astra dev` process.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::state::StateStore;
use crate::watch::State;

/// Push requests that may wait while a reconcile runs.
const PUSH_CHANNEL_CAPACITY: usize = 1;

/// A running dev session.
///
/// Owns the push channel shared by the API server and the watch loop, and
/// the cancellation token stopping both.
pub struct DevSession {
    push_tx: mpsc::Sender<()>,
    push_rx: Mutex<Option<mpsc::Receiver<()>>>,
    token: CancellationToken,
    state: Arc<dyn StateStore>,
    /// Component state published by the reconcile loop for readers such as
    /// the API server.
    component_state: watch::Sender<State>,
}

impl std::fmt::Debug for DevSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevSession")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl DevSession {
    /// Creates a session persisting its state in `state`.
    #[must_use]
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        let (push_tx, push_rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        Self {
            push_tx,
            push_rx: Mutex::new(Some(push_rx)),
            token: CancellationToken::new(),
            state,
            component_state: watch::Sender::new(State::Unknown),
        }
    }

    /// Asks for a reconcile. Returns false when one is already pending.
    #[must_use]
    pub fn request_push(&self) -> bool {
        match self.push_tx.try_send(()) {
            Ok(()) => {
                debug!("Push requested");
                true
            }
            Err(_) => false,
        }
    }

    /// Takes the receiving end of the push channel; only the first caller
    /// gets it.
    pub fn take_push_receiver(&self) -> Option<mpsc::Receiver<()>> {
        self.push_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Stops the session.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            info!("Stopping the dev session");
        }
        self.token.cancel();
    }

    /// Token cancelled when the session stops.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the session was stopped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Records the state reached by the last reconcile.
    pub fn publish_state(&self, state: State) {
        self.component_state.send_replace(state);
    }

    /// State reached by the last reconcile.
    #[must_use]
    pub fn component_state(&self) -> State {
        *self.component_state.borrow()
    }

    /// Devstate of the session.
    #[must_use]
    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }
}
