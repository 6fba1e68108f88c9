//! The `mirage` binary: an adaptive mock platform that learns from the
//! traffic it proxies.

use clap::{Parser, Subcommand};
use mirage_http::{learning, router, AppConfig, AppState};
use mirage_store::Store;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod logging;

#[derive(Parser)]
#[command(
    name = "mirage",
    version,
    about = "Adaptive HTTP mock platform: proxy, learn, simulate"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the proxy/mock server
    Serve(ServeArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "MIRAGE_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "MIRAGE_PORT")]
    port: u16,

    /// Upstream target URL to proxy and learn from
    #[arg(long, env = "TARGET_URL")]
    target_url: Option<String>,

    /// Directory for the database and learned-state documents
    #[arg(long, default_value = "data", env = "MIRAGE_DATA_DIR")]
    data_dir: PathBuf,

    /// Observations buffered before the learning worker drains
    #[arg(long, default_value_t = 1, env = "MIRAGE_LEARNING_BUFFER_SIZE")]
    learning_buffer_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MIRAGE_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    logging::init_logging(&logging::LoggingConfig {
        level: args.log_level.clone(),
        json_format: args.log_json,
    })?;

    std::fs::create_dir_all(&args.data_dir)?;
    let store = Store::connect(&args.data_dir.join("mirage.db")).await?;

    let state = AppState::new(
        store,
        AppConfig {
            target_url: args.target_url.clone(),
            data_dir: Some(args.data_dir.clone()),
            learning_buffer_size: args.learning_buffer_size,
        },
    )?;

    let shutdown = CancellationToken::new();
    let worker = learning::spawn_worker(state.clone(), shutdown.clone());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        target = args.target_url.as_deref().unwrap_or("(unset)"),
        "mirage listening"
    );

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain the learning buffer, then flush learned state to disk
    info!("shutting down");
    shutdown.cancel();
    let _ = worker.await;
    state.flush();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
