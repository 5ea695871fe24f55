//! Backend configuration, read from the environment.

use std::path::PathBuf;

use crate::launcher::HostKind;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Project root passed to Godot via `--path`.
    pub solution_dir: PathBuf,
    /// Seed for the frontend `godotPath` property until the frontend publishes its own.
    pub godot_path: Option<String>,
    /// Seed for `backendSettings.enableDebuggerExtensions`.
    pub enable_debugger_extensions: bool,
    pub host: HostKind,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            solution_dir: PathBuf::from("."),
            godot_path: None,
            enable_debugger_extensions: false,
            host: HostKind::Run,
        }
    }
}

impl BridgeConfig {
    pub fn new(solution_dir: impl Into<PathBuf>, godot_path: Option<String>) -> Self {
        Self {
            solution_dir: solution_dir.into(),
            godot_path,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let solution_dir = std::env::var("GODOT_SOLUTION_DIR")
            .map(PathBuf::from)
            .or_else(|_| std::env::current_dir())
            .unwrap_or_else(|_| PathBuf::from("."));

        let godot_path = std::env::var("GODOT_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty());

        let enable_debugger_extensions = std::env::var("GODOT_ENABLE_DEBUGGER_EXTENSIONS")
            .ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        let host = match std::env::var("GODOT_TEST_HOST").ok().as_deref() {
            Some(v) if v.eq_ignore_ascii_case("debug") => HostKind::Debug,
            _ => HostKind::Run,
        };

        Self {
            solution_dir,
            godot_path,
            enable_debugger_extensions,
            host,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
