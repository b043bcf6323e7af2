//! Configuration for netstore
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};

/// Main configuration for a netstore server instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory of the persistent store. Every committed file lives at
    /// `root/<logical name>`.
    pub root: PathBuf,

    /// Directory holding per-session staging areas. Must share a filesystem
    /// with `root` so commit renames stay atomic. Defaults to a sibling of
    /// `root` named `<root>.staging`, which download can never resolve into.
    pub staging_dir: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections accepted
    pub max_connections: usize,

    /// Worker threads serving connections. A connection occupies a worker for
    /// its whole life (it may hold a transaction open), so this bounds the
    /// number of simultaneously served sessions.
    pub worker_threads: usize,

    /// Connection read timeout (milliseconds, 0 disables). Disabled by
    /// default: an idle peer still holds staged uploads and locks, and
    /// reaping it would roll back its transaction.
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 disables)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Protocol Limits
    // -------------------------------------------------------------------------
    /// Max byte length of a logical file name on the wire
    pub max_name_len: usize,

    /// Max byte length of an uploaded file
    pub max_file_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./netstore_data"),
            staging_dir: None,
            listen_addr: "127.0.0.1:14000".to_string(),
            max_connections: 1024,
            worker_threads: 16,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
            max_name_len: crate::protocol::DEFAULT_MAX_NAME_LEN,
            max_file_size: 1024 * 1024 * 1024, // 1 GiB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The effective staging root: the configured one, or the default
    /// sibling of the store root.
    pub fn staging_root(&self) -> PathBuf {
        match &self.staging_dir {
            Some(dir) => dir.clone(),
            None => {
                let mut name = self.root.file_name().unwrap_or_default().to_os_string();
                name.push(".staging");
                self.root.with_file_name(name)
            }
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn root<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.root = path.as_ref().to_path_buf();
        self
    }

    pub fn staging_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.staging_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.config.listen_addr = addr.to_string();
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.config.max_connections = n;
        self
    }

    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn max_name_len(mut self, len: usize) -> Self {
        self.config.max_name_len = len;
        self
    }

    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
