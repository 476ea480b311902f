use bytes::Bytes;
use mc6_storage::LogPosition;
use serde::{Deserialize, Serialize};

/// Opaque client-correlation token. The engine never interprets this; it
/// only uses it as the key under which the acceptor queue resolves a
/// pending commit promise.
pub type CommitRef = u64;

/// A committed command, as the consensus layer hands it to the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Command {
    /// Advances position, yields a backend-defined reply. Used to pad the
    /// log (e.g. a new leader's initial no-op) without touching state.
    Noop,
    /// Persists cluster configuration under the reserved `config`
    /// metadata key at this position.
    Config(Bytes),
    /// Invokes a registered host function by `(module, function)` with
    /// `(position, table, args)`.
    Execute {
        table: String,
        module: String,
        function: String,
        args: Bytes,
    },
    /// Forwarded verbatim to the backend's `apply`. The engine never
    /// inspects these bytes.
    UserCommand(Bytes),
}

/// One committed log entry as delivered to `apply_op`:
/// `(index, (term, (ref, command)))`.
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub index: u64,
    pub term: u64,
    pub commit_ref: CommitRef,
    pub command: Command,
}

impl LogRecord {
    pub fn new(index: u64, term: u64, commit_ref: CommitRef, command: Command) -> Self {
        Self {
            index,
            term,
            commit_ref,
            command,
        }
    }

    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.index, self.term)
    }
}
