//! netstore CLI Client
//!
//! Command-line interface for uploading and downloading files through the
//! redundant proxy: uploads fan out to every configured server and commit;
//! downloads try servers in the order given.

use std::fs;
use std::process::exit;

use clap::{Parser, Subcommand};
use netstore::{ProxyClient, ProxyConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// netstore CLI
#[derive(Parser, Debug)]
#[command(name = "netstore-cli")]
#[command(about = "CLI for netstore file storage")]
#[command(version)]
struct Args {
    /// Server address (host:port); repeat for redundant backends, listed
    /// in download priority order
    #[arg(short, long, required = true)]
    server: Vec<String>,

    /// Per-operation timeout in milliseconds
    #[arg(short, long, default_value = "5000")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a local file and commit it
    Upload {
        /// Logical name on the server (forward-slash separated)
        name: String,

        /// Local file to read
        file: String,
    },

    /// Download a file
    Download {
        /// Logical name on the server
        name: String,

        /// Local file to write
        file: String,
    },
}

fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,netstore=info"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let config = ProxyConfig {
        op_timeout_ms: args.timeout,
        ..ProxyConfig::default()
    };
    let proxy = ProxyClient::with_config(args.server.iter().cloned(), config);

    match args.command {
        Commands::Upload { name, file } => {
            let content = match fs::read(&file) {
                Ok(content) => content,
                Err(e) => {
                    eprintln!("cannot read {}: {}", file, e);
                    exit(1);
                }
            };
            if let Err(e) = proxy.put(&name, &content) {
                eprintln!("upload failed: {}", e);
                exit(1);
            }
            println!("uploaded {} ({} bytes)", name, content.len());
        }

        Commands::Download { name, file } => {
            let content = match proxy.get(&name) {
                Ok(content) => content,
                Err(e) => {
                    eprintln!("download failed: {}", e);
                    exit(1);
                }
            };
            if let Err(e) = fs::write(&file, &content) {
                eprintln!("cannot write {}: {}", file, e);
                exit(1);
            }
            println!("downloaded {} ({} bytes)", name, content.len());
        }
    }
}
