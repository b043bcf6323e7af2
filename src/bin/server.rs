//! netstore Server Binary
//!
//! Starts a storage backend rooted at the given directory.

use std::sync::Arc;

use clap::Parser;
use netstore::network::Server;
use netstore::store::FileStore;
use netstore::Config;
use tracing_subscriber::{fmt, EnvFilter};

/// netstore storage server
#[derive(Parser, Debug)]
#[command(name = "netstore-server")]
#[command(about = "Transactional file storage server")]
#[command(version)]
struct Args {
    /// Root directory of the persistent store
    root: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "0.0.0.0:14000")]
    listen: String,

    /// Staging directory (defaults to a sibling of the root; must share
    /// the root's filesystem)
    #[arg(long)]
    staging_dir: Option<String>,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Worker threads (bounds simultaneously served sessions)
    #[arg(short, long, default_value = "16")]
    workers: usize,

    /// Maximum uploaded file size in MB
    #[arg(long, default_value = "1024")]
    max_file_mb: u64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,netstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("netstore server v{}", netstore::VERSION);
    tracing::info!("Store root: {}", args.root);
    tracing::info!("Listen address: {}", args.listen);

    let mut builder = Config::builder()
        .root(&args.root)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .worker_threads(args.workers)
        .max_file_size(args.max_file_mb * 1024 * 1024);
    if let Some(dir) = &args.staging_dir {
        builder = builder.staging_dir(dir);
    }
    let config = builder.build();

    let store = match FileStore::open(&config.root) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let mut server = Server::new(config, store);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
