//! Rewrites a direct test-runner invocation into a Godot editor invocation that hosts the
//! runner scene.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::messages::FrontendModel;
use crate::{BridgeError, Result};

/// Scene used as the in-engine entry point for the test harness.
pub const TEST_RUNNER_SCENE: &str = "res://test_runner/runner.tscn";

/// Executable, argument string and environment for a process that is about to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessLaunchSpec {
    executable_path: String,
    arguments: String,
    environment_variables: BTreeMap<String, String>,
}

impl ProcessLaunchSpec {
    pub fn new(executable_path: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            executable_path: executable_path.into(),
            arguments: arguments.into(),
            environment_variables: BTreeMap::new(),
        }
    }

    pub fn executable_path(&self) -> &str {
        &self.executable_path
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    pub fn environment_variables(&self) -> &BTreeMap<String, String> {
        &self.environment_variables
    }

    /// Returns a copy with `name` set. Names are unique, so setting one twice is an error.
    pub fn with_environment_variable(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        if self.environment_variables.contains_key(&name) {
            return Err(BridgeError::DuplicateEnvironmentVariable(name));
        }

        let mut patched = self.clone();
        patched.environment_variables.insert(name, value.into());
        Ok(patched)
    }

    /// Returns a copy that runs a different command with the same environment.
    pub fn with_command(
        &self,
        executable_path: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            executable_path: executable_path.into(),
            arguments: arguments.into(),
            environment_variables: self.environment_variables.clone(),
        }
    }
}

/// Runtime environment resolved for the test project, carried alongside the patched spec to
/// the process spawner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeRequest {
    pub project: String,
    pub working_directory: Option<PathBuf>,
    pub target_framework: Option<String>,
}

/// Everything the patcher needs from the solution and the frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchContext {
    pub solution_dir: PathBuf,
    pub godot_path: Option<String>,
    pub enable_debugger_extensions: bool,
}

impl LaunchContext {
    pub fn resolve(solution_dir: &Path, frontend: Option<&dyn FrontendModel>) -> Result<Self> {
        let frontend = frontend
            .filter(|frontend| frontend.is_connected())
            .ok_or(BridgeError::MissingFrontend)?;
        Ok(Self {
            solution_dir: solution_dir.to_path_buf(),
            godot_path: frontend.godot_path(),
            enable_debugger_extensions: frontend.backend_settings().enable_debugger_extensions,
        })
    }
}

/// Result of a successful patch. The original spec is kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchResult {
    pub original: ProcessLaunchSpec,
    pub request: RuntimeRequest,
    pub patched: ProcessLaunchSpec,
}

pub struct GodotPatcher {
    solution_dir: PathBuf,
    frontend: Option<Arc<dyn FrontendModel>>,
}

impl GodotPatcher {
    pub fn new(solution_dir: impl Into<PathBuf>, frontend: Option<Arc<dyn FrontendModel>>) -> Self {
        Self {
            solution_dir: solution_dir.into(),
            frontend,
        }
    }

    pub fn patch(&self, spec: &ProcessLaunchSpec, request: RuntimeRequest) -> Result<PatchResult> {
        let context = LaunchContext::resolve(&self.solution_dir, self.frontend.as_deref())?;
        let patched = patch_launch_spec(spec, &context)?;

        tracing::debug!(
            executable = patched.executable_path(),
            arguments = patched.arguments(),
            "patched test runner launch"
        );

        Ok(PatchResult {
            original: spec.clone(),
            request,
            patched,
        })
    }
}

/// Produces the Godot invocation for `spec`. The original executable and arguments become
/// data arguments for the runner scene.
pub fn patch_launch_spec(spec: &ProcessLaunchSpec, context: &LaunchContext) -> Result<ProcessLaunchSpec> {
    let godot_path = context
        .godot_path
        .as_deref()
        .filter(|path| !path.is_empty())
        .ok_or(BridgeError::GodotPathUnknown)?;

    let solution_dir = quote_if_needed(&context.solution_dir.display().to_string());
    let arguments = format!(
        "--path {solution_dir} \"{TEST_RUNNER_SCENE}\" --unit_test_assembly \"{}\" --unit_test_args \"{}\"",
        escape_quotes(spec.executable_path()),
        escape_quotes(spec.arguments())
    );

    Ok(spec.with_command(quote_if_needed(godot_path), arguments))
}

/// Wraps `value` in double quotes when it contains whitespace and isn't quoted already.
pub fn quote_if_needed(value: &str) -> String {
    let quoted = value.len() >= 2 && value.starts_with('"') && value.ends_with('"');
    if !quoted && value.chars().any(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

/// Joins `args` into one argument string. [`crate::spawn::split_arguments`] splits the
/// result back into the same list.
pub fn join_arguments<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"') {
                format!("\"{}\"", escape_quotes(arg))
            } else {
                arg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escapes `value` for use between double quotes: quotes become `\"` and backslashes are
/// doubled where they precede a quote or the closing quote.
fn escape_quotes(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let mut backslashes = 0;
    for c in value.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                escaped.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                escaped.push('"');
                backslashes = 0;
            }
            c => {
                escaped.extend(std::iter::repeat('\\').take(backslashes));
                escaped.push(c);
                backslashes = 0;
            }
        }
    }
    escaped.extend(std::iter::repeat('\\').take(backslashes * 2));
    escaped
}
