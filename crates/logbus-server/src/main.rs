//! Logbus server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (logs/ directory, docs.redb, port 7451)
//! logbus-server
//!
//! # Explicit storage locations and chunk size
//! logbus-server --bind 0.0.0.0:7451 --logs-dir /var/lib/logbus/logs \
//!     --docs-db /var/lib/logbus/docs.redb --max-log-chunk-size 4194304
//! ```

use std::path::PathBuf;

use clap::Parser;
use logbus_core::LogConfig;
use logbus_server::{Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logbus event messaging server
#[derive(Parser, Debug)]
#[command(name = "logbus-server")]
#[command(about = "Log-structured event messaging server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7451")]
    bind: String,

    /// Directory for channel log files
    #[arg(long, default_value = "logs")]
    logs_dir: PathBuf,

    /// Path of the document/cursor database
    #[arg(long, default_value = "docs.redb")]
    docs_db: PathBuf,

    /// Bytes per channel log chunk file
    #[arg(long, default_value = "4194304")]
    max_log_chunk_size: u64,

    /// Initial byte credit per subscription and query
    #[arg(long, default_value = "65536")]
    initial_credit: i64,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("logbus server starting");
    tracing::info!("binding to {}", args.bind);
    tracing::info!("logs dir {}", args.logs_dir.display());

    let config = ServerConfig {
        bind_address: args.bind,
        log: LogConfig {
            logs_dir: args.logs_dir,
            max_log_chunk_size: args.max_log_chunk_size,
        },
        docs_path: args.docs_db,
        initial_credit: args.initial_credit,
        max_connections: args.max_connections,
        ..ServerConfig::default()
    };

    let server = Server::bind(config).await?;

    tracing::info!("server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
