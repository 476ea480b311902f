use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use mc6_storage::{BackendContract, EngineConfig, LogPosition, SnapshotDirManager};
use tokio::sync::oneshot;

use crate::{
    acceptor::{AcceptorQueue, ParkedRead},
    command::{Command, LogRecord},
    dispatch::dispatch,
    errors::EngineError,
    registry::FunctionRegistry,
};

/// `Initializing -> Ready -> Terminating`. `Ready` is the steady state.
/// `cancel()` never changes this; only a gapped apply or a backend-apply
/// error drives the engine into `Terminating`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineLifecycle {
    Initializing,
    Ready,
    Terminating,
}

struct EngineState<B: BackendContract> {
    name: String,
    table: String,
    partition: u32,
    root_dir: PathBuf,
    backend: B,
    last_applied: LogPosition,
    lifecycle: EngineLifecycle,
}

enum Message<B: BackendContract> {
    Apply {
        record: LogRecord,
        server_term: u64,
    },
    Read {
        target_index: u64,
        command: Command,
        reply: oneshot::Sender<Result<Vec<u8>, EngineError>>,
    },
    Fulfill {
        commit_ref: crate::command::CommitRef,
        reply: Result<Vec<u8>, EngineError>,
    },
    Cancel,
    Open {
        reply: oneshot::Sender<LogPosition>,
    },
    CreateSnapshot {
        name: Option<String>,
        reply: oneshot::Sender<Result<LogPosition, EngineError>>,
    },
    OpenSnapshot {
        position: LogPosition,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    DeleteSnapshot {
        name: String,
    },
    ReadMetadata {
        key: String,
        reply: oneshot::Sender<Result<Option<(LogPosition, Vec<u8>)>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Vec<(String, String)>>,
    },
    Terminate {
        reason: String,
    },
    #[allow(dead_code)]
    Phantom(std::marker::PhantomData<B>),
}

/// A handle to a running apply-engine instance. Cloning the handle shares
/// the same serialized inbox; it does not spawn a second worker.
pub struct EngineHandle<B: BackendContract + Send + 'static> {
    tx: flume::Sender<Message<B>>,
}

impl<B: BackendContract + Send + 'static> Clone for EngineHandle<B> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

const INBOX_CAPACITY: usize = 1024;

impl<B: BackendContract + Send + 'static> EngineHandle<B> {
    /// Open the backend and spawn the serialized command loop. Opening the
    /// backend is fatal on failure — there is no partially-initialized
    /// instance.
    pub fn open(
        config: EngineConfig,
        acceptor: Arc<dyn AcceptorQueue>,
        registry: FunctionRegistry<B>,
    ) -> Result<Self, EngineError> {
        let identity = &config.identity;
        let backend = B::open(&identity.name, &identity.table, identity.partition, &identity.root_dir)?;
        let last_applied = backend.position();

        log::info!(
            name = identity.name, table = identity.table, partition = identity.partition,
            last_applied = last_applied.to_string();
            "engine initialized"
        );

        let state = EngineState {
            name: identity.name.clone(),
            table: identity.table.clone(),
            partition: identity.partition,
            root_dir: identity.root_dir.clone(),
            backend,
            last_applied,
            lifecycle: EngineLifecycle::Ready,
        };

        let snapshot_mgr = SnapshotDirManager::new(
            identity.root_dir.clone(),
            config.snapshot.prefix.clone(),
            config.snapshot.max_retained,
        );

        let (tx, rx) = flume::bounded(INBOX_CAPACITY);
        tokio::task::spawn(run_loop(state, rx, acceptor, registry, snapshot_mgr));

        Ok(Self { tx })
    }

    /// Returns `last_applied`. Pure read; used by the consensus layer at
    /// startup to discover durable progress.
    pub async fn open_position(&self) -> LogPosition {
        let (reply, rx) = oneshot::channel();
        if self.tx.send_async(Message::Open { reply }).await.is_err() {
            return LogPosition::ZERO;
        }
        rx.await.unwrap_or(LogPosition::ZERO)
    }

    /// Asynchronous, no-reply: the committed entry is consumed and
    /// ordering-checked; the client reply (if any) arrives via the
    /// acceptor queue instead of this call.
    pub async fn apply_op(&self, record: LogRecord, server_term: u64) {
        let _ = self.tx.send_async(Message::Apply { record, server_term }).await;
    }

    /// Dispatch `command` at `target_index`, or park it until the engine's
    /// applied position reaches `target_index`.
    pub async fn read(&self, target_index: u64, command: Command) -> Result<Vec<u8>, EngineError> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send_async(Message::Read {
                target_index,
                command,
                reply,
            })
            .await
            .is_err()
        {
            return Err(EngineError::Unknown("engine inbox closed".to_string()));
        }
        rx.await.unwrap_or(Err(EngineError::Unknown("engine dropped without replying".to_string())))
    }

    /// Forward an exogenously-produced reply to the acceptor queue.
    pub async fn fulfill_op(&self, commit_ref: crate::command::CommitRef, reply: Result<Vec<u8>, EngineError>) {
        let _ = self.tx.send_async(Message::Fulfill { commit_ref, reply }).await;
    }

    /// Resolve every pending commit and read promise with `NotLeader`.
    /// Idempotent; safe with no waiters outstanding.
    pub async fn cancel(&self) {
        let _ = self.tx.send_async(Message::Cancel).await;
    }

    pub async fn create_snapshot(&self, name: Option<String>) -> Result<LogPosition, EngineError> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send_async(Message::CreateSnapshot { name, reply })
            .await
            .is_err()
        {
            return Err(EngineError::Unknown("engine inbox closed".to_string()));
        }
        rx.await.unwrap_or(Err(EngineError::Unknown("engine dropped without replying".to_string())))
    }

    pub async fn open_snapshot(&self, position: LogPosition) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send_async(Message::OpenSnapshot { position, reply })
            .await
            .is_err()
        {
            return Err(EngineError::Unknown("engine inbox closed".to_string()));
        }
        rx.await.unwrap_or(Err(EngineError::Unknown("engine dropped without replying".to_string())))
    }

    /// Best-effort, fire-and-forget recursive directory removal.
    pub async fn delete_snapshot(&self, name: String) {
        let _ = self.tx.send_async(Message::DeleteSnapshot { name }).await;
    }

    pub async fn read_metadata(&self, key: String) -> Result<Option<(LogPosition, Vec<u8>)>, EngineError> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send_async(Message::ReadMetadata { key, reply })
            .await
            .is_err()
        {
            return Err(EngineError::Unknown("engine inbox closed".to_string()));
        }
        rx.await.unwrap_or(Err(EngineError::Unknown("engine dropped without replying".to_string())))
    }

    pub async fn status(&self) -> Vec<(String, String)> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send_async(Message::Status { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Close the backend handle unconditionally. Called once, at shutdown.
    pub async fn terminate(&self, reason: impl Into<String>) {
        let _ = self
            .tx
            .send_async(Message::Terminate { reason: reason.into() })
            .await;
    }
}

async fn run_loop<B: BackendContract + Send + 'static>(
    mut state: EngineState<B>,
    inbox: flume::Receiver<Message<B>>,
    acceptor: Arc<dyn AcceptorQueue>,
    registry: FunctionRegistry<B>,
    snapshot_mgr: SnapshotDirManager,
) {
    while let Ok(message) = inbox.recv_async().await {
        let should_stop = handle_message(&mut state, message, acceptor.as_ref(), &registry, &snapshot_mgr);
        if should_stop || state.lifecycle == EngineLifecycle::Terminating {
            break;
        }
    }
    log::info!(name = state.name, table = state.table, partition = state.partition; "engine loop exiting, closing backend");
    state.backend.close();
}

/// Returns `true` if the loop should stop after this message.
fn handle_message<B: BackendContract>(
    state: &mut EngineState<B>,
    message: Message<B>,
    acceptor: &dyn AcceptorQueue,
    registry: &FunctionRegistry<B>,
    snapshot_mgr: &SnapshotDirManager,
) -> bool {
    match message {
        Message::Apply { record, server_term } => {
            handle_apply(state, record, server_term, acceptor, registry);
            false
        }
        Message::Read {
            target_index,
            command,
            reply,
        } => {
            handle_read(state, registry, target_index, command, reply, acceptor);
            false
        }
        Message::Fulfill { commit_ref, reply } => {
            acceptor.resolve_commit(commit_ref, reply);
            false
        }
        Message::Cancel => {
            log::info!(name = state.name, partition = state.partition; "cancel: draining pending waiters");
            acceptor.cancel_all();
            false
        }
        Message::Open { reply } => {
            let _ = reply.send(state.last_applied);
            false
        }
        Message::CreateSnapshot { name, reply } => {
            let result = handle_create_snapshot(state, snapshot_mgr, name);
            let _ = reply.send(result);
            false
        }
        Message::OpenSnapshot { position, reply } => {
            let result = handle_open_snapshot(state, snapshot_mgr, position);
            let _ = reply.send(result);
            false
        }
        Message::DeleteSnapshot { name } => {
            snapshot_mgr.delete(&name);
            false
        }
        Message::ReadMetadata { key, reply } => {
            let result = state
                .backend
                .read_metadata(&key)
                .map(|maybe| maybe.map(|entry| (entry.version, entry.value)))
                .map_err(EngineError::from);
            let _ = reply.send(result);
            false
        }
        Message::Status { reply } => {
            let mut entries = vec![
                ("name".to_string(), state.name.clone()),
                ("table".to_string(), state.table.clone()),
                ("partition".to_string(), state.partition.to_string()),
                ("last_applied.index".to_string(), state.last_applied.index.to_string()),
                ("last_applied.term".to_string(), state.last_applied.term.to_string()),
                ("lifecycle".to_string(), format!("{:?}", state.lifecycle)),
            ];
            entries.extend(state.backend.status());
            let _ = reply.send(entries);
            false
        }
        Message::Terminate { reason } => {
            log::info!(name = state.name, partition = state.partition, reason = reason; "terminate requested");
            state.lifecycle = EngineLifecycle::Terminating;
            true
        }
        Message::Phantom(_) => unreachable!(),
    }
}

fn handle_apply<B: BackendContract>(
    state: &mut EngineState<B>,
    record: LogRecord,
    server_term: u64,
    acceptor: &dyn AcceptorQueue,
    registry: &FunctionRegistry<B>,
) {
    acceptor.notify_apply_started(record.commit_ref);

    if record.index == state.last_applied.index {
        log::debug!(
            index = record.index, last_applied = state.last_applied.to_string();
            "redelivery at current position, not re-applying"
        );
        drain_delayed_reads(state, acceptor, registry);
        return;
    }

    if record.index != state.last_applied.index + 1 {
        log::error!(
            expected = state.last_applied.index + 1, got = record.index;
            "gapped apply, terminating instance"
        );
        acceptor.resolve_commit(
            record.commit_ref,
            Err(EngineError::GapDetected {
                expected: state.last_applied.index + 1,
                got: record.index,
                last_applied: state.last_applied,
            }),
        );
        state.lifecycle = EngineLifecycle::Terminating;
        return;
    }

    let position = record.position();
    match dispatch(&mut state.backend, registry, &record.command, position) {
        Ok(reply) => {
            if record.term == server_term {
                acceptor.resolve_commit(record.commit_ref, Ok(reply));
            } else {
                log::debug!(
                    index = record.index, term = record.term, server_term = server_term;
                    "dropping reply, leader term mismatch"
                );
            }
            state.last_applied = position;
            drain_delayed_reads(state, acceptor, registry);
        }
        Err(err @ (EngineError::ExecuteFailed { .. } | EngineError::UnknownFunction { .. })) => {
            log::warn!(index = record.index, err = err.to_string(); "execute failed, delivering error reply");
            if record.term == server_term {
                acceptor.resolve_commit(record.commit_ref, Err(err));
            }
            state.last_applied = position;
            drain_delayed_reads(state, acceptor, registry);
        }
        Err(err) => {
            log::error!(index = record.index, err = err.to_string(); "backend apply failed, terminating instance");
            acceptor.resolve_commit(record.commit_ref, Err(err));
            state.lifecycle = EngineLifecycle::Terminating;
        }
    }
}

fn drain_delayed_reads<B: BackendContract>(
    state: &mut EngineState<B>,
    acceptor: &dyn AcceptorQueue,
    registry: &FunctionRegistry<B>,
) {
    for parked in acceptor.drain_ready(state.last_applied.index) {
        let ParkedRead {
            command, responder, ..
        } = parked;
        let result = dispatch(&mut state.backend, registry, &command, state.last_applied);
        let _ = responder.send(result);
    }
}

fn handle_read<B: BackendContract>(
    state: &mut EngineState<B>,
    registry: &FunctionRegistry<B>,
    target_index: u64,
    command: Command,
    reply: oneshot::Sender<Result<Vec<u8>, EngineError>>,
    acceptor: &dyn AcceptorQueue,
) {
    if target_index <= state.last_applied.index {
        let result = dispatch(&mut state.backend, registry, &command, state.last_applied);
        let _ = reply.send(result);
    } else {
        acceptor.park_read(ParkedRead {
            target_index,
            command,
            responder: reply,
        });
    }
}

fn handle_create_snapshot<B: BackendContract>(
    state: &EngineState<B>,
    snapshot_mgr: &SnapshotDirManager,
    name: Option<String>,
) -> Result<LogPosition, EngineError> {
    let path = match &name {
        Some(name) => state.root_dir.join(name),
        None => snapshot_mgr.path_for(state.last_applied),
    };

    if path.exists() {
        log::debug!(path = %path.display(); "snapshot destination already exists, treating as success");
        return Ok(state.last_applied);
    }

    snapshot_mgr.enforce_retention();
    state.backend.create_snapshot(&path)?;
    log::info!(position = state.last_applied.to_string(), path = %path.display(); "snapshot created");
    Ok(state.last_applied)
}

fn handle_open_snapshot<B: BackendContract>(
    state: &mut EngineState<B>,
    snapshot_mgr: &SnapshotDirManager,
    position: LogPosition,
) -> Result<(), EngineError> {
    // Named from the *requested* position, not the engine's current
    // `last_applied` — see REDESIGN FLAGS.
    let path = snapshot_mgr.path_for(position);
    let new_backend = B::open_snapshot(&path, position)?;
    let old_backend = mem::replace(&mut state.backend, new_backend);
    old_backend.close();
    state.last_applied = position;
    log::info!(position = position.to_string(); "snapshot installed");
    Ok(())
}
