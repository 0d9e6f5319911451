//! Graph Replay Binary
//!
//! Replays a JSON-lines operation log against a graph and prints the
//! resulting snapshot as JSON on stdout.
//!
//! Each input line is one operation envelope:
//!
//! ```json
//! {"type":"add_node","payload":{"id":"a","label":"A"},"session_id":"s1","version":1}
//! ```
//!
//! ## Configuration
//!
//! Environment variables:
//! - `GRAPH_ID`: graph to replay into when not given as an argument (default: "default")
//! - `REPLAY_REBASE`: "1" to rewrite each operation's version to the current one
//! - `GRAPH_KEEP_LAST`: versions retained per graph (default: all)
//! - `DATABASE_URL`: replay into PostgreSQL (requires the `postgres` feature)
//! - `RUST_LOG`, `LOG_FORMAT`: logging, see `telemetry`
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin graph_replay --features replay -- my-graph ops.jsonl
//! cat ops.jsonl | cargo run --bin graph_replay --features replay -- my-graph
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use graph_collab_kernel::{
    init_tracing, CollabError, CollaborationEngine, EngineConfig, GraphId, GraphOperation, InMemorySnapshotStore,
    LogFormat, SnapshotStore,
};

/// Replay outcome counters.
#[derive(Debug, Default)]
struct ReplayStats {
    applied: usize,
    rejected: usize,
}

async fn replay<S, R>(
    engine: &CollaborationEngine<S>,
    graph_id: &GraphId,
    input: R,
    rebase: bool,
) -> Result<ReplayStats, Box<dyn std::error::Error>>
where
    S: SnapshotStore,
    R: AsyncBufRead + Unpin,
{
    let mut stats = ReplayStats::default();
    let mut lines = input.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let mut operation = match GraphOperation::from_json(&line) {
            Ok(op) => op,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping unreadable operation");
                stats.rejected += 1;
                continue;
            }
        };

        if rebase {
            operation.version = engine.current_graph(graph_id).await?.version;
        }

        match engine.apply(graph_id, &operation).await {
            Ok(_) => stats.applied += 1,
            Err(e) if e.is_conflict() || matches!(e, CollabError::ReferentialIntegrity(_)) => {
                warn!(line = line_no, error = %e, "Operation rejected");
                stats.rejected += 1;
            }
            Err(e) => {
                error!(line = line_no, error = %e, "Replay aborted");
                return Err(e.into());
            }
        }
    }

    Ok(stats)
}

async fn run<S: SnapshotStore>(
    store: Arc<S>,
    graph_id: GraphId,
    input: Box<dyn AsyncBufRead + Unpin + Send>,
) -> Result<(), Box<dyn std::error::Error>> {
    let rebase = std::env::var("REPLAY_REBASE").map(|v| v == "1").unwrap_or(false);
    let engine = CollaborationEngine::new(store).with_config(EngineConfig::from_env());

    let started = Instant::now();
    let stats = replay(&engine, &graph_id, input, rebase).await?;
    let snapshot = engine.current_graph(&graph_id).await?;

    info!(
        graph_id = %graph_id,
        applied = stats.applied,
        rejected = stats.rejected,
        version = snapshot.version,
        cycles = snapshot.quality.cycles.len(),
        latency_ms = started.elapsed().as_millis() as u64,
        "Replay complete"
    );

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    engine.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = init_tracing(LogFormat::from_env()) {
        eprintln!("tracing already initialized: {}", e);
    }

    let mut args = std::env::args().skip(1);
    let graph_id = args
        .next()
        .or_else(|| std::env::var("GRAPH_ID").ok())
        .map(GraphId::new)
        .unwrap_or_else(|| GraphId::from("default"));

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match args.next() {
        Some(path) => {
            info!(path = %path, "Reading operations from file");
            Box::new(BufReader::new(tokio::fs::File::open(path).await?))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    #[cfg(feature = "postgres")]
    if std::env::var("DATABASE_URL").is_ok() {
        info!("Connecting to PostgreSQL...");
        let store = match tokio::time::timeout(
            std::time::Duration::from_secs(30),
            graph_collab_kernel::PostgresSnapshotStore::from_env(),
        )
        .await
        {
            Ok(Ok(store)) => store,
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to PostgreSQL");
                return Err(e.into());
            }
            Err(_) => {
                error!("PostgreSQL connection timeout after 30s");
                return Err("Database connection timeout".into());
            }
        };
        return run(Arc::new(store), graph_id, input).await;
    }

    run(Arc::new(InMemorySnapshotStore::new()), graph_id, input).await
}
