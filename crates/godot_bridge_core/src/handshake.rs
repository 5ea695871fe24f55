//! Debugger start handshake.
//!
//! Before a debug run spawns the test runner, the backend asks the frontend to open a
//! debugger listener and waits for the port. One [`DebuggerHandshake`] belongs to one Run
//! and issues at most one request over its whole life.
//!
//! State moves `Idle -> Requested -> {Succeeded | Failed | Cancelled}`. Every transition goes
//! through the state channel's write lock, so a reply arriving on a transport thread and the
//! Run's lifetime terminating on another can't both win.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;

use crate::lifetime::{Lifetime, LifetimeDefinition};
use crate::messages::{DebuggerStartRequest, DebuggerStartResult, Delivery, FrontendModel, Reply};
use crate::{BridgeError, Result};

const UNABLE_TO_START: &str = "Unable to start debugger.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Requested,
    Succeeded(i32),
    Failed(String),
    Cancelled,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_) | Self::Cancelled)
    }
}

struct Shared {
    run_lifetime: Lifetime,
    state: watch::Sender<HandshakeState>,
    scope: Mutex<Option<LifetimeDefinition>>,
}

impl Shared {
    fn complete(&self, outcome: impl FnOnce(bool) -> HandshakeState) -> bool {
        let run = &self.run_lifetime;
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = outcome(run.is_alive());
            true
        });

        if changed {
            self.log_outcome();
            self.release_scope();
        }
        changed
    }

    fn deliver(&self, delivery: Delivery<DebuggerStartResult>) {
        let applied = self.complete(|run_alive| match delivery {
            _ if !run_alive => HandshakeState::Cancelled,
            Delivery::Value(result) if result.is_success() => HandshakeState::Succeeded(result.port),
            Delivery::Value(_) => HandshakeState::Failed(UNABLE_TO_START.to_string()),
            Delivery::Abandoned => HandshakeState::Failed(
                "Frontend dropped the debugger start request without answering.".to_string(),
            ),
        });

        if !applied {
            tracing::debug!(run = self.run_lifetime.name(), "discarding stale debugger start reply");
        }
    }

    fn cancel(&self) {
        self.complete(|_| HandshakeState::Cancelled);
    }

    fn release_scope(&self) {
        let scope = self
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(scope);
    }

    fn log_outcome(&self) {
        let run = self.run_lifetime.name();
        match &*self.state.borrow() {
            HandshakeState::Succeeded(port) => {
                tracing::info!(run, port, "debugger listener ready");
            }
            HandshakeState::Failed(reason) => {
                tracing::warn!(run, reason = reason.as_str(), "debugger handshake failed");
            }
            HandshakeState::Cancelled => {
                tracing::debug!(run, "debugger handshake cancelled");
            }
            HandshakeState::Idle | HandshakeState::Requested => {}
        }
    }
}

pub struct DebuggerHandshake {
    shared: Arc<Shared>,
}

impl DebuggerHandshake {
    pub fn new(run_lifetime: Lifetime) -> Self {
        let (state, _) = watch::channel(HandshakeState::Idle);
        Self {
            shared: Arc::new(Shared {
                run_lifetime,
                state,
                scope: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.shared.state.borrow().clone()
    }

    /// Port of a successful handshake. Fixed once set.
    pub fn port(&self) -> Option<i32> {
        match *self.shared.state.borrow() {
            HandshakeState::Succeeded(port) => Some(port),
            _ => None,
        }
    }

    /// Sends the start request unless one was already sent for this Run.
    pub fn start(&self, frontend: &dyn FrontendModel) {
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == HandshakeState::Idle {
                *state = HandshakeState::Requested;
                true
            } else {
                false
            }
        });
        if !claimed {
            return;
        }

        let scope = self.shared.run_lifetime.define_child("debugger-handshake");
        let lifetime = scope.lifetime().clone();
        *self
            .shared
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(scope);

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        lifetime.on_termination(move || {
            if let Some(shared) = weak.upgrade() {
                shared.cancel();
            }
        });

        if self.shared.state.borrow().is_terminal() {
            return;
        }

        tracing::info!(run = self.shared.run_lifetime.name(), "requesting debugger listener from frontend");

        let weak = Arc::downgrade(&self.shared);
        let reply = Reply::new(move |delivery| {
            if let Some(shared) = weak.upgrade() {
                shared.deliver(delivery);
            }
        });
        frontend.start_debugger_server(&lifetime, DebuggerStartRequest, reply);
    }

    /// Starts the handshake if needed and waits for it to finish.
    ///
    /// There is no timeout: the Run's lifetime is the only bound. Terminating it releases the
    /// wait with [`BridgeError::Cancelled`].
    pub async fn wait_for_port(&self, frontend: &dyn FrontendModel) -> Result<i32> {
        self.start(frontend);

        let mut updates = self.shared.state.subscribe();
        let outcome = updates
            .wait_for(HandshakeState::is_terminal)
            .await
            .map(|state| state.clone())
            .unwrap_or(HandshakeState::Cancelled);

        match outcome {
            HandshakeState::Succeeded(port) => Ok(port),
            HandshakeState::Failed(reason) => Err(BridgeError::debugger_start_failed_because(reason)),
            _ => Err(BridgeError::cancelled("debugger handshake")),
        }
    }
}
