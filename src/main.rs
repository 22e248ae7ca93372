//! tickmesh — real-time market-data compute server.
//!
//! Wires the synchronous core (thread pool, dispatcher, order books,
//! materializer) to the async transport edge (axum WebSocket routes and the
//! outbound feed connectors) and runs until a signal triggers the ordered
//! shutdown sequence.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tickmesh_backend::book::manager::OrderBookManager;
use tickmesh_backend::book::materializer::{MaterializeConfig, Materializer};
use tickmesh_backend::book::provider::ObProvider;
use tickmesh_backend::config::Config;
use tickmesh_backend::dispatch::MarketDispatcher;
use tickmesh_backend::rt::{ShutdownCoordinator, ThreadPool};
use tickmesh_backend::server::feed::{self, FeedRouter};
use tickmesh_backend::server::ws::{build_router, AppState, SessionSet};
use tickmesh_backend::server::SessionConfig;
use tickmesh_backend::store::{AtomicStore, FunctionRegistry, HistoryStore, ProviderRegistry};
use tickmesh_backend::tree::Deps;

#[derive(Parser, Debug)]
#[command(name = "tickmesh", about = "Real-time market-data compute server")]
struct Cli {
    /// WebSocket port (overrides config and environment)
    ws_port: Option<u16>,

    /// Path to a JSON config file
    config: Option<PathBuf>,
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    let json = cfg.log_format.eq_ignore_ascii_case("json");
    if cfg.log_file.is_empty() {
        if json {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        return;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.log_file)
    {
        Ok(file) => {
            let writer = Arc::new(file);
            if json {
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(move || writer.clone()),
                    )
                    .init();
            } else {
                registry
                    .with(
                        tracing_subscriber::fmt::layer().with_writer(move || writer.clone()),
                    )
                    .init();
            }
        }
        Err(e) => {
            registry.with(tracing_subscriber::fmt::layer()).init();
            warn!(file = %cfg.log_file, error = %e, "cannot open log file; using stdout");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::from_env();
    if let Some(path) = &cli.config {
        if let Err(e) = cfg.apply_file(path) {
            eprintln!("[config] warning: {e:#}");
        }
    }
    if let Some(port) = cli.ws_port {
        cfg.ws_port = port;
    }

    init_tracing(&cfg);
    info!(ws_port = cfg.ws_port, threads = cfg.thread_pool_size, "boot");

    // metrics recorder (prometheus) when enabled
    let prometheus = if cfg.metrics_enabled {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "prometheus recorder install failed; /metrics disabled");
                None
            }
        }
    } else {
        None
    };

    // ---- synchronous core ----
    let pool = Arc::new(ThreadPool::new(cfg.thread_pool_size));
    let store = Arc::new(AtomicStore::new());
    let functions = Arc::new(FunctionRegistry::with_builtins());
    let providers = Arc::new(ProviderRegistry::new());
    let history = Arc::new(HistoryStore::new(cfg.ta_history_max));
    let dispatcher = MarketDispatcher::new(
        pool.clone(),
        store.clone(),
        functions.clone(),
        history,
        cfg.ta.clone(),
        cfg.ta_history_max,
    );

    let books = Arc::new(OrderBookManager::new());
    Arc::new(ObProvider::new(books.clone(), cfg.ob_depth)).install(&providers);

    let materializer = Materializer::new(
        books.clone(),
        store.clone(),
        MaterializeConfig {
            max_levels: cfg.ob_depth,
            throttle_ms: cfg.ob_throttle_ms,
            ..MaterializeConfig::default()
        },
    );
    materializer.start();

    let deps = Deps {
        store,
        pool: pool.clone(),
        dispatcher: dispatcher.clone(),
        providers,
        functions,
        listener_queue_cap: cfg.listener_queue_cap,
    };

    let feed_router = FeedRouter {
        dispatcher,
        books: books.clone(),
        materializer: materializer.clone(),
    };

    // ---- transport edge ----
    let sessions = SessionSet::new();
    let state = AppState {
        deps,
        session_cfg: SessionConfig::default(),
        feed_router: feed_router.clone(),
        sessions: sessions.clone(),
        prometheus,
    };
    let app = build_router(state);

    let (feed_stop_tx, feed_stop_rx) = watch::channel(false);
    let connector_handles = feed::spawn_connectors(cfg.feed_urls.clone(), feed_router, feed_stop_rx);
    if !cfg.feed_urls.is_empty() {
        info!(feeds = cfg.feed_urls.len(), "outbound feed connectors started");
    }

    // periodic metrics snapshot to the log
    if cfg.metrics_enabled {
        let every = cfg.metrics_interval_sec.max(1);
        let book_stats = books.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(every));
            loop {
                ticker.tick().await;
                info!(
                    books = ?book_stats.stats(),
                    registry = %tickmesh_backend::metrics::registry().snapshot_json(),
                    "metrics snapshot"
                );
            }
        });
    }

    // ---- ordered shutdown ----
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let (accept_stop_tx, mut accept_stop_rx) = watch::channel(false);

    coordinator.register_step("http-stop-accept", 5, move || {
        let _ = accept_stop_tx.send(true);
    });
    {
        let sessions = sessions.clone();
        coordinator.register_step("close-sessions", 40, move || {
            sessions.close_all();
        });
    }
    coordinator.register_step("feed-stop", 55, move || {
        let _ = feed_stop_tx.send(true);
    });
    {
        let materializer = materializer.clone();
        coordinator.register_step("materializer-stop", 60, move || {
            materializer.stop();
        });
    }
    {
        let pool = pool.clone();
        coordinator.register_step("pool-drain", 80, move || {
            pool.drain();
        });
    }
    {
        let pool = pool.clone();
        coordinator.register_step("pool-shutdown", 85, move || {
            pool.shutdown();
        });
    }

    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("signal handler failed");
                return;
            }
            info!("signal received; stopping");
            // steps block (pool drain); keep them off the reactor
            let _ = tokio::task::spawn_blocking(move || coordinator.stop_all()).await;
        });
    }

    // ---- serve ----
    let addr = format!("0.0.0.0:{}", cfg.ws_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = accept_stop_rx.changed().await;
        })
        .await
        .context("server error")?;

    // natural exit also runs the full sequence (idempotent)
    let coordinator2 = coordinator.clone();
    let _ = tokio::task::spawn_blocking(move || coordinator2.stop_all()).await;
    for h in connector_handles {
        h.abort();
    }
    info!("stopped");
    Ok(())
}
