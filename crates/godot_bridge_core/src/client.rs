//! Frontend model over a line-delimited JSON channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::config::BridgeConfig;
use crate::lifetime::Lifetime;
use crate::messages::{
    BackendMessage, BackendSettings, DebuggerStartRequest, DebuggerStartResult, FrontendMessage,
    FrontendModel, GameOutputEvent, Reply,
};
use crate::Result;

/// Replies waiting for an answer, keyed by request id. `None` once the channel has closed.
type PendingReplies = Arc<Mutex<Option<HashMap<u64, Reply<DebuggerStartResult>>>>>;

#[derive(Debug, Default)]
struct Properties {
    godot_path: Option<String>,
    settings: BackendSettings,
}

/// [`FrontendModel`] over a line-delimited JSON channel to the frontend process.
pub struct FrontendConnection {
    outbound: mpsc::UnboundedSender<BackendMessage>,
    pending: PendingReplies,
    properties: Arc<Mutex<Properties>>,
    request_id: AtomicU64,
}

impl FrontendConnection {
    /// Starts the reader and writer tasks. Must be called inside a tokio runtime.
    pub fn connect<R, W>(reader: R, writer: W, config: &BridgeConfig) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, rx) = mpsc::unbounded_channel();
        let pending: PendingReplies = Arc::new(Mutex::new(Some(HashMap::new())));
        let properties = Arc::new(Mutex::new(Properties {
            godot_path: config.godot_path.clone(),
            settings: BackendSettings {
                enable_debugger_extensions: config.enable_debugger_extensions,
            },
        }));

        tokio::spawn(writer_loop(writer, rx, pending.clone()));
        tokio::spawn(reader_loop(reader, pending.clone(), properties.clone()));

        Arc::new(Self {
            outbound,
            pending,
            properties,
            request_id: AtomicU64::new(1),
        })
    }

    fn properties(&self) -> MutexGuard<'_, Properties> {
        self.properties.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, message: BackendMessage) -> bool {
        self.outbound.send(message).is_ok()
    }
}

impl FrontendModel for FrontendConnection {
    fn is_connected(&self) -> bool {
        lock(&self.pending).is_some()
    }

    fn activate_rider(&self) {
        self.send(BackendMessage::ActivateRider);
    }

    fn start_debugger_server(
        &self,
        lifetime: &Lifetime,
        _request: DebuggerStartRequest,
        reply: Reply<DebuggerStartResult>,
    ) {
        if !lifetime.is_alive() {
            return;
        }

        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let rejected = {
            let mut pending = lock(&self.pending);
            match pending.as_mut() {
                Some(replies) => {
                    replies.insert(id, reply);
                    None
                }
                None => Some(reply),
            }
        };
        if let Some(reply) = rejected {
            tracing::debug!(id, "frontend channel closed, abandoning startDebuggerServer");
            drop(reply);
            return;
        }

        let pending = self.pending.clone();
        lifetime.on_termination(move || {
            drop(take_pending(&pending, id));
        });

        tracing::debug!(id, "sending startDebuggerServer");
        if !self.send(BackendMessage::StartDebuggerServer { id }) {
            drop(take_pending(&self.pending, id));
        }
    }

    fn on_game_output_event(&self, event: GameOutputEvent) {
        self.send(BackendMessage::OnGameOutputEvent { event });
    }

    fn godot_path(&self) -> Option<String> {
        self.properties().godot_path.clone()
    }

    fn backend_settings(&self) -> BackendSettings {
        self.properties().settings
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_pending(pending: &PendingReplies, id: u64) -> Option<Reply<DebuggerStartResult>> {
    lock(pending).as_mut().and_then(|replies| replies.remove(&id))
}

/// Marks the channel closed and drops every pending reply outside the lock; each drop
/// notifies its waiter.
fn close(pending: &PendingReplies) {
    let abandoned = lock(pending).take().unwrap_or_default();
    if !abandoned.is_empty() {
        tracing::debug!(count = abandoned.len(), "abandoning pending frontend requests");
    }
    drop(abandoned);
}

async fn writer_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<BackendMessage>,
    pending: PendingReplies,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            tracing::warn!(error = %e, "failed to write to frontend");
            break;
        }
    }

    close(&pending);
}

async fn write_message<W>(writer: &mut W, message: &BackendMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

async fn reader_loop<R>(reader: R, pending: PendingReplies, properties: Arc<Mutex<Properties>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read from frontend");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let message = match serde_json::from_str::<FrontendMessage>(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, line = line.as_str(), "ignoring invalid frontend message");
                continue;
            }
        };

        match message {
            FrontendMessage::Reply { id, result } => match take_pending(&pending, id) {
                Some(reply) => {
                    tracing::debug!(id, port = result.port, "startDebuggerServer answered");
                    reply.send(result);
                }
                None => tracing::debug!(id, "ignoring reply for a request that is no longer pending"),
            },
            FrontendMessage::GodotPath { value } => {
                tracing::debug!(godot_path = ?value, "frontend updated godotPath");
                lock(&properties).godot_path = value;
            }
            FrontendMessage::BackendSettings(settings) => {
                tracing::debug!(?settings, "frontend updated backend settings");
                lock(&properties).settings = settings;
            }
        }
    }

    tracing::info!("frontend connection closed");
    close(&pending);
}
