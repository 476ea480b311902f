use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::{command::CommitRef, errors::EngineError};

/// A read request parked because its target index had not yet been
/// applied when it arrived. Held by the acceptor queue, keyed by target
/// index, until the engine's applied position catches up.
pub struct ParkedRead {
    pub target_index: u64,
    pub command: crate::command::Command,
    pub responder: oneshot::Sender<Result<Vec<u8>, EngineError>>,
}

/// The interface the apply engine uses to resolve pending client promises
/// by reference. A concrete, network-backed queue lives upstream of this
/// crate and is out of scope here; [`InMemoryAcceptorQueue`] is the
/// default single-process wiring and the vehicle used by this crate's own
/// tests.
pub trait AcceptorQueue: Send + Sync {
    /// Called once at the start of `apply_op`, before dispatch, to tell
    /// the queue that one pending-apply slot for `commit_ref` is about to
    /// be consumed.
    fn notify_apply_started(&self, commit_ref: CommitRef);

    /// Resolve the commit promise keyed by `commit_ref` with `reply`. A
    /// `commit_ref` with no registered waiter is a silent no-op: the
    /// producer may not be co-located with every partition's engine.
    fn resolve_commit(&self, commit_ref: CommitRef, reply: Result<Vec<u8>, EngineError>);

    /// Park a read request until the applied position reaches
    /// `read.target_index`.
    fn park_read(&self, read: ParkedRead);

    /// Remove and return every parked read whose target index is
    /// `<= upto_index`.
    fn drain_ready(&self, upto_index: u64) -> Vec<ParkedRead>;

    /// Resolve every outstanding commit and read promise with
    /// [`EngineError::NotLeader`]. Must be idempotent and safe to call
    /// with no waiters registered.
    fn cancel_all(&self);
}

/// Default, in-process acceptor queue. Commit waiters and parked reads are
/// each held in a `DashMap`, mirroring the teacher's `DashMap`-backed
/// watch registry.
#[derive(Default)]
pub struct InMemoryAcceptorQueue {
    commits: DashMap<CommitRef, oneshot::Sender<Result<Vec<u8>, EngineError>>>,
    reads: DashMap<u64, Vec<ParkedRead>>,
}

impl InMemoryAcceptorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a commit promise, returning the receiver half. Exercises
    /// the role an external producer plays before handing a record to the
    /// engine: registration happens out-of-band, ahead of `apply_op`.
    pub fn register_commit(&self, commit_ref: CommitRef) -> oneshot::Receiver<Result<Vec<u8>, EngineError>> {
        let (tx, rx) = oneshot::channel();
        self.commits.insert(commit_ref, tx);
        rx
    }

    pub fn pending_commit_count(&self) -> usize {
        self.commits.len()
    }

    pub fn pending_read_count(&self) -> usize {
        self.reads.iter().map(|entry| entry.value().len()).sum()
    }
}

impl AcceptorQueue for InMemoryAcceptorQueue {
    fn notify_apply_started(&self, _commit_ref: CommitRef) {
        // The in-memory queue needs no bookkeeping for this signal; a
        // network-backed queue would use it to track in-flight slots.
    }

    fn resolve_commit(&self, commit_ref: CommitRef, reply: Result<Vec<u8>, EngineError>) {
        if let Some((_, tx)) = self.commits.remove(&commit_ref) {
            let _ = tx.send(reply);
        } else {
            log::debug!(commit_ref = commit_ref; "resolve_commit for unknown or already-resolved ref");
        }
    }

    fn park_read(&self, read: ParkedRead) {
        self.reads.entry(read.target_index).or_default().push(read);
    }

    fn drain_ready(&self, upto_index: u64) -> Vec<ParkedRead> {
        let ready_keys: Vec<u64> = self
            .reads
            .iter()
            .map(|entry| *entry.key())
            .filter(|index| *index <= upto_index)
            .collect();

        let mut drained = Vec::new();
        for key in ready_keys {
            if let Some((_, reads)) = self.reads.remove(&key) {
                drained.extend(reads);
            }
        }
        drained
    }

    fn cancel_all(&self) {
        let commit_refs: Vec<CommitRef> = self.commits.iter().map(|entry| *entry.key()).collect();
        for commit_ref in commit_refs {
            self.resolve_commit(commit_ref, Err(EngineError::NotLeader));
        }

        let read_keys: Vec<u64> = self.reads.iter().map(|entry| *entry.key()).collect();
        for key in read_keys {
            if let Some((_, reads)) = self.reads.remove(&key) {
                for read in reads {
                    let _ = read.responder.send(Err(EngineError::NotLeader));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[tokio::test]
    async fn resolve_commit_delivers_to_registered_waiter() {
        let queue = InMemoryAcceptorQueue::new();
        let rx = queue.register_commit(42);
        queue.resolve_commit(42, Ok(b"reply".to_vec()));
        assert_eq!(rx.await.unwrap().unwrap(), b"reply".to_vec());
    }

    #[tokio::test]
    async fn resolve_commit_for_unknown_ref_is_a_silent_no_op() {
        let queue = InMemoryAcceptorQueue::new();
        queue.resolve_commit(1, Ok(vec![]));
    }

    #[tokio::test]
    async fn cancel_all_resolves_every_waiter_with_not_leader() {
        let queue = InMemoryAcceptorQueue::new();
        let c1 = queue.register_commit(1);
        let c2 = queue.register_commit(2);
        let (tx, rx) = oneshot::channel();
        queue.park_read(ParkedRead {
            target_index: 5,
            command: Command::Noop,
            responder: tx,
        });

        queue.cancel_all();

        assert!(matches!(c1.await.unwrap(), Err(EngineError::NotLeader)));
        assert!(matches!(c2.await.unwrap(), Err(EngineError::NotLeader)));
        assert!(matches!(rx.await.unwrap(), Err(EngineError::NotLeader)));
    }

    #[test]
    fn cancel_all_with_no_waiters_is_safe() {
        let queue = InMemoryAcceptorQueue::new();
        queue.cancel_all();
        queue.cancel_all();
    }

    #[test]
    fn drain_ready_removes_only_entries_at_or_below_the_index() {
        let queue = InMemoryAcceptorQueue::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        queue.park_read(ParkedRead {
            target_index: 3,
            command: Command::Noop,
            responder: tx1,
        });
        queue.park_read(ParkedRead {
            target_index: 7,
            command: Command::Noop,
            responder: tx2,
        });

        let drained = queue.drain_ready(5);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].target_index, 3);
        assert_eq!(queue.pending_read_count(), 1);
    }
}
