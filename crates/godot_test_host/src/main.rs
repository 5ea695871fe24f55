//! Runs a test executable under the Godot editor on behalf of a frontend on stdio.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use godot_bridge_core::launcher::RuntimeEnvironment;
use godot_bridge_core::patcher::join_arguments;
use godot_bridge_core::spawn::forward_game_output;
use godot_bridge_core::{
    BridgeConfig, FrontendConnection, FrontendModel, ProcessLaunchSpec, Run, TestRunnerContext,
    TestRunnerHost, TokioSpawner,
};
use tokio::process::Child;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: godot_test_host <test-runner-executable> [args...]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is the frontend channel, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let executable = args.next().context(USAGE)?;
    let arguments = join_arguments(args);

    let config = BridgeConfig::from_env();
    let connection = FrontendConnection::connect(tokio::io::stdin(), tokio::io::stdout(), &config);
    let frontend: Arc<dyn FrontendModel> = connection.clone();

    let run = Arc::new(Run::new(format!("run-{}", std::process::id()), config.host));
    {
        let run = run.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(run = run.id(), "interrupted, terminating run");
                run.terminate();
            }
        });
    }

    let runtime = RuntimeEnvironment {
        project: project_name(&executable),
        target_framework: None,
        working_directory: Some(config.solution_dir.clone()),
    };
    let mut context = TestRunnerContext::new(runtime, Some(run.clone()));
    let host = TestRunnerHost::new(config.solution_dir.clone(), Some(frontend.clone()));

    tracing::info!(run = run.id(), host = ?config.host, executable = executable.as_str(), "starting test run");

    let spec = ProcessLaunchSpec::new(executable, arguments);
    let child = match host
        .launch(spec, &mut context, &TokioSpawner::capturing_output())
        .await
    {
        Ok(child) => child,
        Err(e) if e.is_cancellation() => {
            tracing::info!(run = run.id(), "launch cancelled");
            std::process::exit(130);
        }
        Err(e) => return Err(e).context("failed to launch test runner"),
    };

    let code = supervise(child, &run, frontend).await?;
    run.terminate();
    std::process::exit(code);
}

/// Relays output until the child exits, killing it if the run ends first.
async fn supervise(mut child: Child, run: &Run, frontend: Arc<dyn FrontendModel>) -> anyhow::Result<i32> {
    let forwarders = forward_game_output(&mut child, frontend);

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = run.lifetime().cancelled() => {
            tracing::info!(run = run.id(), "run ended, stopping test runner");
            child.kill().await?;
            child.wait().await?
        }
    };

    for forwarder in forwarders {
        let _ = forwarder.await;
    }

    tracing::info!(run = run.id(), %status, "test runner exited");
    Ok(status.code().unwrap_or(1))
}

fn project_name(executable: &str) -> String {
    Path::new(executable)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(executable)
        .to_string()
}
