//! Godot Bridge Core
//!
//! Backend side of the Godot unit-test integration. Launches the test runner inside the
//! Godot editor executable and, for debug runs, asks the frontend to open a debugger
//! listener before the child process starts executing tests.

pub mod client;
pub mod config;
pub mod error;
pub mod handshake;
pub mod launcher;
pub mod lifetime;
pub mod messages;
pub mod patcher;
pub mod spawn;

// Re-export commonly used types
pub use client::FrontendConnection;
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use handshake::{DebuggerHandshake, HandshakeState};
pub use launcher::{HostKind, Run, TestRunnerContext, TestRunnerHost};
pub use lifetime::{Lifetime, LifetimeDefinition};
pub use messages::{FrontendModel, Reply};
pub use patcher::{GodotPatcher, LaunchContext, ProcessLaunchSpec};
pub use spawn::{ProcessSpawner, TokioSpawner};

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
