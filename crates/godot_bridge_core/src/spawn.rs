//! Spawning the patched test runner and relaying its console output.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::launcher::PreparedProcess;
use crate::messages::{FrontendModel, GameOutputEvent, GameOutputEventType};
use crate::{BridgeError, Result};

/// Turns a prepared launch into a running process.
pub trait ProcessSpawner {
    type Process;

    fn spawn(&self, process: &PreparedProcess) -> Result<Self::Process>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner {
    capture_output: bool,
}

impl TokioSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipes stdout and stderr so they can be passed to [`forward_game_output`].
    pub fn capturing_output() -> Self {
        Self {
            capture_output: true,
        }
    }
}

impl ProcessSpawner for TokioSpawner {
    type Process = Child;

    fn spawn(&self, process: &PreparedProcess) -> Result<Child> {
        let spec = process.spec();
        let executable = unquote(spec.executable_path());

        let mut command = Command::new(executable);
        command
            .args(split_arguments(spec.arguments()))
            .envs(spec.environment_variables())
            .stdin(Stdio::null());

        if let Some(dir) = &process.request().working_directory {
            command.current_dir(dir);
        }

        if self.capture_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        command.spawn().map_err(|source| BridgeError::Spawn {
            executable: executable.to_string(),
            source,
        })
    }
}

/// Streams the child's stdout as messages and stderr as errors to the frontend.
pub fn forward_game_output(child: &mut Child, frontend: Arc<dyn FrontendModel>) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        tasks.push(tokio::spawn(pump_lines(
            stdout,
            GameOutputEventType::Message,
            frontend.clone(),
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(tokio::spawn(pump_lines(stderr, GameOutputEventType::Error, frontend)));
    }
    tasks
}

async fn pump_lines<R>(reader: R, kind: GameOutputEventType, frontend: Arc<dyn FrontendModel>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => frontend.on_game_output_event(GameOutputEvent {
                kind,
                message: line,
            }),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(?kind, error = %e, "game output stream closed");
                break;
            }
        }
    }
}

/// Splits an argument string on whitespace, keeping double-quoted runs together. Inverse of
/// the quoting the patcher applies.
///
/// Backslashes are literal unless they precede a quote: `2n` backslashes before a quote give
/// `n` backslashes and toggle quoting, `2n + 1` give `n` backslashes and a literal quote.
pub fn split_arguments(arguments: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut backslashes = 0;

    for c in arguments.chars() {
        match c {
            '\\' => {
                backslashes += 1;
                in_token = true;
                continue;
            }
            '"' => {
                current.extend(std::iter::repeat('\\').take(backslashes / 2));
                if backslashes % 2 == 1 {
                    current.push('"');
                } else {
                    in_quotes = !in_quotes;
                }
                in_token = true;
            }
            c => {
                current.extend(std::iter::repeat('\\').take(backslashes));
                if c.is_whitespace() && !in_quotes {
                    if in_token {
                        args.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                } else {
                    current.push(c);
                    in_token = true;
                }
            }
        }
        backslashes = 0;
    }

    current.extend(std::iter::repeat('\\').take(backslashes));
    if in_token {
        args.push(current);
    }
    args
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
