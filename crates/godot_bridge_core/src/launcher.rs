//! Launching test runners for a Run, with the debugger handshake for debug runs.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::handshake::DebuggerHandshake;
use crate::lifetime::{Lifetime, LifetimeDefinition};
use crate::messages::FrontendModel;
use crate::patcher::{GodotPatcher, PatchResult, ProcessLaunchSpec, RuntimeRequest};
use crate::spawn::ProcessSpawner;
use crate::{BridgeError, Result};

/// Environment variable the Godot Mono runtime reads its debugger agent options from.
pub const DEBUGGER_AGENT_VARIABLE: &str = "GODOT_MONO_DEBUGGER_AGENT";

pub fn debugger_agent_options(port: i32) -> String {
    format!("--debugger-agent=transport=dt_socket,address=127.0.0.1:{port},server=n,suspend=y")
}

/// Which host provider started the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Run,
    Debug,
}

/// One test execution. Dropping it ends its lifetime and cancels an in-flight handshake.
pub struct Run {
    id: String,
    host: HostKind,
    lifetime: LifetimeDefinition,
    handshake: OnceLock<DebuggerHandshake>,
}

impl Run {
    pub fn new(id: impl Into<String>, host: HostKind) -> Self {
        let id = id.into();
        Self {
            lifetime: LifetimeDefinition::new(id.clone()),
            id,
            host,
            handshake: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> HostKind {
        self.host
    }

    pub fn lifetime(&self) -> &Lifetime {
        self.lifetime.lifetime()
    }

    /// Ends the run, e.g. when the user stops it.
    pub fn terminate(&self) {
        self.lifetime.terminate();
    }

    /// The run's handshake, if a debug launch has created one.
    pub fn handshake(&self) -> Option<&DebuggerHandshake> {
        self.handshake.get()
    }

    fn debugger_handshake(&self) -> &DebuggerHandshake {
        self.handshake
            .get_or_init(|| DebuggerHandshake::new(self.lifetime().clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRunnerSettings {
    pub no_isolation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    pub project: String,
    pub target_framework: Option<String>,
    pub working_directory: Option<PathBuf>,
}

impl RuntimeEnvironment {
    pub fn to_runtime_request(&self) -> RuntimeRequest {
        RuntimeRequest {
            project: self.project.clone(),
            working_directory: self.working_directory.clone(),
            target_framework: self.target_framework.clone(),
        }
    }
}

/// What the test framework knows about the launch. `run` is set for execution contexts.
pub struct TestRunnerContext {
    pub settings: TestRunnerSettings,
    pub runtime: RuntimeEnvironment,
    pub run: Option<Arc<Run>>,
}

impl TestRunnerContext {
    pub fn new(runtime: RuntimeEnvironment, run: Option<Arc<Run>>) -> Self {
        Self {
            settings: TestRunnerSettings::default(),
            runtime,
            run,
        }
    }
}

/// A patched launch ready to hand to a [`ProcessSpawner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedProcess {
    pub patch: PatchResult,
}

impl PreparedProcess {
    pub fn spec(&self) -> &ProcessLaunchSpec {
        &self.patch.patched
    }

    pub fn request(&self) -> &RuntimeRequest {
        &self.patch.request
    }
}

/// Starts test runner processes inside the Godot editor.
pub struct TestRunnerHost {
    solution_dir: PathBuf,
    frontend: Option<Arc<dyn FrontendModel>>,
}

impl TestRunnerHost {
    pub fn new(solution_dir: impl Into<PathBuf>, frontend: Option<Arc<dyn FrontendModel>>) -> Self {
        Self {
            solution_dir: solution_dir.into(),
            frontend,
        }
    }

    /// Prepares `spec` for launch.
    ///
    /// Debug runs wait for the debugger handshake and carry the agent options in the
    /// environment. A failed or cancelled handshake aborts the launch.
    pub async fn start_process(
        &self,
        spec: ProcessLaunchSpec,
        context: &mut TestRunnerContext,
    ) -> Result<PreparedProcess> {
        context.settings.no_isolation = true;

        let mut spec = spec;
        if let Some(run) = context.run.as_ref().filter(|run| run.host() == HostKind::Debug) {
            let frontend = self
                .frontend
                .as_deref()
                .filter(|frontend| frontend.is_connected())
                .ok_or(BridgeError::MissingFrontend)?;

            if frontend.backend_settings().enable_debugger_extensions {
                let port = run.debugger_handshake().wait_for_port(frontend).await?;
                spec = spec.with_environment_variable(DEBUGGER_AGENT_VARIABLE, debugger_agent_options(port))?;
            } else {
                tracing::info!(run = run.id(), "debugger extensions disabled, launching without debugger agent");
            }
        }

        let patcher = GodotPatcher::new(self.solution_dir.clone(), self.frontend.clone());
        let patch = patcher.patch(&spec, context.runtime.to_runtime_request())?;
        Ok(PreparedProcess { patch })
    }

    /// [`Self::start_process`] followed by the spawn.
    pub async fn launch<S: ProcessSpawner>(
        &self,
        spec: ProcessLaunchSpec,
        context: &mut TestRunnerContext,
        spawner: &S,
    ) -> Result<S::Process> {
        let prepared = self.start_process(spec, context).await?;
        tracing::info!(
            executable = prepared.spec().executable_path(),
            project = prepared.request().project.as_str(),
            "spawning test runner"
        );
        spawner.spawn(&prepared)
    }
}
