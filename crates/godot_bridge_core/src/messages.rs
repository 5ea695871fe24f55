//! Messages exchanged between the backend and the frontend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lifetime::Lifetime;

/// Asks the frontend to open a debugger listener. Carries no data; a Run has at most one
/// request in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebuggerStartRequest;

/// Port the frontend listens on. Zero or negative means the listener could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebuggerStartResult {
    pub port: i32,
}

impl DebuggerStartResult {
    pub fn new(port: i32) -> Self {
        Self { port }
    }

    pub fn is_success(&self) -> bool {
        self.port > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOutputEventType {
    Error,
    Message,
}

/// A line of console output from the game under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutputEvent {
    #[serde(rename = "type")]
    pub kind: GameOutputEventType,
    pub message: String,
}

impl GameOutputEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            kind: GameOutputEventType::Message,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: GameOutputEventType::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSettings {
    pub enable_debugger_extensions: bool,
}

/// Outcome handed to a [`Reply`] callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    Value(T),
    /// The transport dropped the reply without answering.
    Abandoned,
}

/// One-shot completion handle for a frontend call.
///
/// The transport completes it from whatever thread receives the answer. A reply that is
/// dropped without [`Reply::send`] delivers [`Delivery::Abandoned`], so the waiting side
/// always hears back exactly once.
pub struct Reply<T> {
    deliver: Option<Box<dyn FnOnce(Delivery<T>) + Send + 'static>>,
}

impl<T> Reply<T> {
    pub fn new(deliver: impl FnOnce(Delivery<T>) + Send + 'static) -> Self {
        Self {
            deliver: Some(Box::new(deliver)),
        }
    }

    pub fn send(mut self, value: T) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Delivery::Value(value));
        }
    }
}

impl<T> Drop for Reply<T> {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Delivery::Abandoned);
        }
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("pending", &self.deliver.is_some())
            .finish()
    }
}

/// The frontend surface the backend consumes.
pub trait FrontendModel: Send + Sync {
    /// Whether the channel to the frontend is still open. A closed frontend counts as no
    /// frontend at all.
    fn is_connected(&self) -> bool;

    /// Brings the IDE window to the foreground.
    fn activate_rider(&self);

    /// Requests a debugger listener. `reply` is completed with the allocated port. When
    /// `lifetime` terminates first the transport may drop `reply` unanswered.
    fn start_debugger_server(
        &self,
        lifetime: &Lifetime,
        request: DebuggerStartRequest,
        reply: Reply<DebuggerStartResult>,
    );

    fn on_game_output_event(&self, event: GameOutputEvent);

    /// Absolute path to the Godot editor executable, if the frontend knows it.
    fn godot_path(&self) -> Option<String>;

    fn backend_settings(&self) -> BackendSettings;
}

/// Backend to frontend, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackendMessage {
    ActivateRider,
    StartDebuggerServer { id: u64 },
    OnGameOutputEvent { event: GameOutputEvent },
}

/// Frontend to backend, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FrontendMessage {
    Reply { id: u64, result: DebuggerStartResult },
    GodotPath { value: Option<String> },
    BackendSettings(BackendSettings),
}
