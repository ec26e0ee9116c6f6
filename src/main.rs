use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use spread_tx::execution::{OrderDispatcher, PaperGateway};
use spread_tx::ipc::{self, IpcStats};
use spread_tx::{Config, Runner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,spread_tx=debug"));

    // stdout carries snapshots, so logs go to stderr
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("🦀 spread-tx starting...");

    let config = match std::env::var("SPREAD_TX_CONFIG") {
        Ok(path) => Config::load(&PathBuf::from(path))?,
        Err(_) => Config::load_default(),
    };
    config.validate()?;

    let gateway = Arc::new(PaperGateway::new());
    let dispatcher = Arc::new(OrderDispatcher::new(gateway, &config.execution));
    tracing::info!(quantity = config.execution.quantity, "📝 paper order gateway attached");

    let (tick_tx, tick_rx) = flume::bounded(4096);
    let (control_tx, control_rx) = flume::unbounded();
    let (event_tx, event_rx) = flume::bounded(1024);

    let tick_stats = Arc::new(IpcStats::default());
    let control_stats = Arc::new(IpcStats::default());

    let tick_socket = config.ipc.tick_socket.clone();
    let stats = tick_stats.clone();
    tokio::spawn(async move {
        if let Err(e) = ipc::listen_ticks(tick_socket, tick_tx, stats).await {
            tracing::error!("tick listener stopped: {}", e);
        }
    });

    let control_socket = config.ipc.control_socket.clone();
    let stats = control_stats.clone();
    tokio::spawn(async move {
        if let Err(e) = ipc::listen_control(control_socket, control_tx, stats).await {
            tracing::error!("control listener stopped: {}", e);
        }
    });

    let (runner, mut snapshots) = Runner::new(&config, dispatcher);
    let runner = runner.with_events(event_tx);

    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("unprintable event: {}", e),
            }
        }
    });

    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let line = serde_json::to_string(&*snapshots.borrow_and_update());
            match line {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("unprintable snapshot: {}", e),
            }
            tracing::debug!(
                tick_lines = tick_stats.lines(),
                tick_rejected = tick_stats.rejected(),
                control_rejected = control_stats.rejected(),
                "ipc counters"
            );
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let pipeline = runner.run(tick_rx, control_rx, shutdown).await;
    let stats = pipeline.stats();
    tracing::info!(
        ticks = stats.ticks,
        malformed = stats.malformed,
        dispatches = stats.dispatches,
        dropped_events = stats.dropped_events,
        "👋 spread-tx stopped"
    );
    Ok(())
}
