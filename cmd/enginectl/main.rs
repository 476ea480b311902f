use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mc6_engine::{Command, EngineHandle, FunctionRegistry, InMemoryAcceptorQueue};
use mc6_storage::{EngineConfig, LogPosition, SledBackend};
use simplelog::{CombinedLogger, TermLogger};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Config file to load
    #[arg(short, long)]
    pub config_file: Option<PathBuf>,
}

/// A thin, line-oriented control surface over a single `EngineHandle`.
/// Reads one command per line from stdin; writes one reply line to stdout.
/// Supported commands: `open`, `status`, `snapshot-create`,
/// `snapshot-open <index> <term>`, `read-metadata <key>`, `quit`.
#[tokio::main]
pub async fn main() -> Result<(), mc6_engine::EngineError> {
    let args = CmdArgs::parse();
    CombinedLogger::init(vec![TermLogger::new(
        log::LevelFilter::Info,
        simplelog::ConfigBuilder::new().build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )])
    .unwrap();

    log::info!("enginectl starting");

    let config = EngineConfig::load(args.config_file)?;
    let acceptor = Arc::new(InMemoryAcceptorQueue::new());
    let registry: FunctionRegistry<SledBackend> = FunctionRegistry::new();
    let engine = EngineHandle::<SledBackend>::open(config, acceptor, registry)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line.unwrap_or_default();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            engine.terminate("operator requested shutdown").await;
            break;
        }

        let reply = run_command(&engine, line).await;
        writeln!(stdout, "{reply}").ok();
        stdout.flush().ok();
    }

    Ok(())
}

async fn run_command(engine: &EngineHandle<SledBackend>, line: &str) -> String {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("open") => format!("{}", engine.open_position().await),
        Some("status") => engine
            .status()
            .await
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" "),
        Some("snapshot-create") => match engine.create_snapshot(None).await {
            Ok(position) => format!("ok {position}"),
            Err(e) => format!("err {e}"),
        },
        Some("snapshot-open") => {
            let index = parts.next().and_then(|s| s.parse().ok());
            let term = parts.next().and_then(|s| s.parse().ok());
            match (index, term) {
                (Some(index), Some(term)) => {
                    match engine.open_snapshot(LogPosition::new(index, term)).await {
                        Ok(()) => "ok".to_string(),
                        Err(e) => format!("err {e}"),
                    }
                }
                _ => "err usage: snapshot-open <index> <term>".to_string(),
            }
        }
        Some("read-metadata") => match parts.next() {
            Some(key) => match engine.read_metadata(key.to_string()).await {
                Ok(Some((version, value))) => {
                    format!("ok {version} {}", String::from_utf8_lossy(&value))
                }
                Ok(None) => "ok <none>".to_string(),
                Err(e) => format!("err {e}"),
            },
            None => "err usage: read-metadata <key>".to_string(),
        },
        Some("noop") => match engine.read(0, Command::Noop).await {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("err {e}"),
        },
        Some(other) => format!("err unknown command: {other}"),
        None => "err empty command".to_string(),
    }
}
