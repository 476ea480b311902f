use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mc6_engine::{Command, EngineError, EngineHandle, FunctionRegistry, InMemoryAcceptorQueue, LogRecord, ParkedRead};
use mc6_storage::EngineConfig;
use tempfile::TempDir;

fn config_for(root_dir: PathBuf) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.identity.name = "test".to_string();
    config.identity.table = "t".to_string();
    config.identity.partition = 0;
    config.identity.root_dir = root_dir;
    config
}

async fn open_engine(root_dir: PathBuf) -> (EngineHandle<mc6_storage::SledBackend>, Arc<InMemoryAcceptorQueue>) {
    let acceptor = Arc::new(InMemoryAcceptorQueue::new());
    let registry = FunctionRegistry::new();
    let handle = EngineHandle::open(config_for(root_dir), acceptor.clone(), registry).unwrap();
    (handle, acceptor)
}

async fn wait_for<T>(rx: tokio::sync::oneshot::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("reply timed out")
        .expect("sender dropped")
}

#[tokio::test]
async fn fresh_start_apply_and_status() {
    let tmp = TempDir::new().unwrap();
    let (engine, acceptor) = open_engine(tmp.path().to_path_buf()).await;

    assert_eq!(engine.open_position().await, mc6_storage::LogPosition::ZERO);

    let rx = acceptor.register_commit(1);
    engine
        .apply_op(LogRecord::new(1, 1, 1, Command::Noop), 1)
        .await;
    let reply = wait_for(rx).await.unwrap();
    assert_eq!(reply, Vec::<u8>::new());

    assert_eq!(engine.open_position().await, mc6_storage::LogPosition::new(1, 1));

    let status = engine.status().await;
    assert!(status
        .iter()
        .any(|(k, v)| k == "last_applied.index" && v == "1"));
}

#[tokio::test]
async fn config_apply_is_visible_through_read_metadata() {
    let tmp = TempDir::new().unwrap();
    let (engine, acceptor) = open_engine(tmp.path().to_path_buf()).await;

    let rx1 = acceptor.register_commit(1);
    engine.apply_op(LogRecord::new(1, 1, 1, Command::Noop), 1).await;
    wait_for(rx1).await.unwrap();

    let rx2 = acceptor.register_commit(2);
    let config_bytes = Bytes::from_static(b"cluster-config-v1");
    engine
        .apply_op(
            LogRecord::new(2, 1, 2, Command::Config(config_bytes.clone())),
            1,
        )
        .await;
    wait_for(rx2).await.unwrap();

    let (version, value) = engine
        .read_metadata("config".to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(version, mc6_storage::LogPosition::new(2, 1));
    assert_eq!(value, config_bytes.to_vec());
    assert_eq!(engine.open_position().await, mc6_storage::LogPosition::new(2, 1));
}

#[tokio::test]
async fn redelivery_at_current_position_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let (engine, acceptor) = open_engine(tmp.path().to_path_buf()).await;

    let rx1 = acceptor.register_commit(1);
    engine.apply_op(LogRecord::new(1, 1, 1, Command::Noop), 1).await;
    wait_for(rx1).await.unwrap();

    let config_bytes = Bytes::from_static(b"cfg");
    let rx2 = acceptor.register_commit(2);
    engine
        .apply_op(
            LogRecord::new(2, 1, 2, Command::Config(config_bytes.clone())),
            1,
        )
        .await;
    wait_for(rx2).await.unwrap();

    let before = engine.read_metadata("config".to_string()).await.unwrap().unwrap();

    // Redeliver the same index. Nothing is registered under ref 2 this time,
    // so a silent no-op is the only observable outcome; state must match.
    engine
        .apply_op(LogRecord::new(2, 1, 2, Command::Config(config_bytes)), 1)
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = engine.read_metadata("config".to_string()).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(engine.open_position().await, mc6_storage::LogPosition::new(2, 1));
}

#[tokio::test]
async fn gap_terminates_the_instance() {
    let tmp = TempDir::new().unwrap();
    let (engine, acceptor) = open_engine(tmp.path().to_path_buf()).await;

    let rx1 = acceptor.register_commit(1);
    engine.apply_op(LogRecord::new(1, 1, 1, Command::Noop), 1).await;
    wait_for(rx1).await.unwrap();
    let rx2 = acceptor.register_commit(2);
    engine.apply_op(LogRecord::new(2, 1, 2, Command::Noop), 1).await;
    wait_for(rx2).await.unwrap();

    let rx3 = acceptor.register_commit(3);
    engine.apply_op(LogRecord::new(4, 1, 3, Command::Noop), 1).await;
    let err = wait_for(rx3).await.unwrap_err();
    assert!(matches!(err, EngineError::GapDetected { expected: 3, got: 4, .. }));

    // The instance is terminating; a further read should fail because the
    // inbox is draining and will close once the loop observes termination.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let result = engine.read(0, Command::Noop).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn snapshot_round_trip_restores_position_after_restart() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let (engine, acceptor) = open_engine(root.clone()).await;

    let rx1 = acceptor.register_commit(1);
    engine.apply_op(LogRecord::new(1, 1, 1, Command::Noop), 1).await;
    wait_for(rx1).await.unwrap();
    let rx2 = acceptor.register_commit(2);
    engine.apply_op(LogRecord::new(2, 1, 2, Command::Noop), 1).await;
    wait_for(rx2).await.unwrap();

    let position = engine.create_snapshot(None).await.unwrap();
    assert_eq!(position, mc6_storage::LogPosition::new(2, 1));
    assert!(root.join("snapshot.2.1").exists());

    engine.terminate("test shutdown").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (restarted, _acceptor) = open_engine(root.clone()).await;
    restarted.open_snapshot(mc6_storage::LogPosition::new(2, 1)).await.unwrap();
    assert_eq!(restarted.open_position().await, mc6_storage::LogPosition::new(2, 1));
}

#[tokio::test]
async fn retention_keeps_only_the_newest_snapshot() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let mut config = config_for(root.clone());
    config.snapshot.max_retained = 1;

    let acceptor = Arc::new(InMemoryAcceptorQueue::new());
    let registry = FunctionRegistry::new();
    let engine: EngineHandle<mc6_storage::SledBackend> =
        EngineHandle::open(config, acceptor.clone(), registry).unwrap();

    let rx1 = acceptor.register_commit(1);
    engine.apply_op(LogRecord::new(1, 1, 1, Command::Noop), 1).await;
    wait_for(rx1).await.unwrap();
    engine.create_snapshot(None).await.unwrap();
    assert!(root.join("snapshot.1.1").exists());

    let rx2 = acceptor.register_commit(2);
    engine.apply_op(LogRecord::new(2, 1, 2, Command::Noop), 1).await;
    wait_for(rx2).await.unwrap();
    engine.create_snapshot(None).await.unwrap();

    assert!(root.join("snapshot.2.1").exists());
    assert!(!root.join("snapshot.1.1").exists());
}

#[tokio::test]
async fn cancel_resolves_every_pending_waiter_with_not_leader() {
    let tmp = TempDir::new().unwrap();
    let (engine, acceptor) = open_engine(tmp.path().to_path_buf()).await;

    let r1 = acceptor.register_commit(100);
    let r2 = acceptor.register_commit(101);
    let (tx, q1) = tokio::sync::oneshot::channel();
    acceptor.park_read(ParkedRead {
        target_index: 5,
        command: Command::Noop,
        responder: tx,
    });

    engine.cancel().await;

    assert!(matches!(wait_for(r1).await, Err(EngineError::NotLeader)));
    assert!(matches!(wait_for(r2).await, Err(EngineError::NotLeader)));
    assert!(matches!(wait_for(q1).await, Err(EngineError::NotLeader)));
}
