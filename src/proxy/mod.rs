//! Proxy Client
//!
//! A client façade multiplexing operations across multiple redundant
//! backends. Exposes the same operation surface as a single backend, with
//! explicit fan-out semantics:
//!
//! - **upload / prepare / commit**: dispatched concurrently; aggregate
//!   success if at least one backend succeeds
//! - **rollback**: best-effort, never fails the caller
//! - **download**: backends tried in configured priority order, first
//!   success wins
//!
//! Backends that fail transport-wise are cooled down and reconnected
//! lazily on next use; the proxy provides availability, not replica
//! consistency.

mod backend;

pub use backend::Backend;

use std::thread;

use tracing::debug;

use crate::error::{NetstoreError, Result};

/// Timeouts and failure handling for proxy-side backend sessions
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// TCP connect timeout per backend (milliseconds, 0 disables)
    pub connect_timeout_ms: u64,

    /// Socket read/write timeout per operation (milliseconds, 0 disables)
    pub op_timeout_ms: u64,

    /// How long a failed backend is considered unhealthy before the next
    /// reconnect attempt
    pub cooldown_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            op_timeout_ms: 5000,
            cooldown_ms: 2000,
        }
    }
}

/// Client façade over N independent backends
pub struct ProxyClient {
    backends: Vec<Backend>,
    config: ProxyConfig,
}

impl ProxyClient {
    /// Build a proxy over the given backend addresses. Order matters:
    /// downloads prefer earlier backends.
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(addrs, ProxyConfig::default())
    }

    pub fn with_config<I, S>(addrs: I, config: ProxyConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            backends: addrs.into_iter().map(|a| Backend::new(a.into())).collect(),
            config,
        }
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    // -------------------------------------------------------------------------
    // Transactional operations
    // -------------------------------------------------------------------------

    /// Upload to every healthy backend concurrently. Succeeds if at least
    /// one backend accepted the bytes; backends that accepted join the
    /// transaction cohort driven by prepare/commit/rollback.
    pub fn upload(&self, name: &str, content: &[u8]) -> Result<()> {
        let results = self.fan_out(|backend| backend.upload(&self.config, name, content));
        self.aggregate(results, "upload")
    }

    /// Ask every cohort backend to re-verify its staged files. Backends
    /// that fail prepare are rolled back and leave the cohort.
    pub fn prepare(&self) -> Result<()> {
        let cohort: Vec<&Backend> = self.cohort();
        if cohort.is_empty() {
            debug!("prepare with no pending uploads");
            return Ok(());
        }
        let results = self.fan_out_over(&cohort, |backend| {
            let result = backend.prepare(&self.config);
            if matches!(result, Err(NetstoreError::Rejected(_))) {
                let _ = backend.rollback(&self.config);
            }
            result
        });
        self.aggregate(results, "prepare")
    }

    /// Commit on every cohort backend. Succeeds if at least one backend
    /// made the files visible.
    pub fn commit(&self) -> Result<()> {
        let cohort: Vec<&Backend> = self.cohort();
        if cohort.is_empty() {
            debug!("commit with no pending uploads");
            return Ok(());
        }
        let results = self.fan_out_over(&cohort, |backend| backend.commit(&self.config));
        self.aggregate(results, "commit")
    }

    /// Roll back on every cohort backend, best-effort. Never surfaces
    /// failure: a backend that cannot be reached rolls back on its own
    /// when the session drops.
    pub fn rollback(&self) {
        let cohort: Vec<&Backend> = self.cohort();
        let _ = self.fan_out_over(&cohort, |backend| backend.rollback(&self.config));
        for backend in &self.backends {
            backend.clear_transaction();
        }
    }

    // -------------------------------------------------------------------------
    // Downloads
    // -------------------------------------------------------------------------

    /// Download from the first backend that has the file, in priority
    /// order. Unreachable backends and misses fall through to the next.
    pub fn download(&self, name: &str) -> Result<Vec<u8>> {
        let mut saw_not_found = false;
        for backend in &self.backends {
            match backend.download(&self.config, name) {
                Ok(content) => return Ok(content),
                Err(NetstoreError::NotFound(_)) => {
                    debug!(backend = %backend.addr(), name = %name, "not found, trying next");
                    saw_not_found = true;
                }
                Err(err) => {
                    debug!(backend = %backend.addr(), name = %name, error = %err, "trying next");
                }
            }
        }
        if saw_not_found {
            Err(NetstoreError::NotFound(name.to_string()))
        } else {
            Err(NetstoreError::BackendUnavailable)
        }
    }

    // -------------------------------------------------------------------------
    // One-shot conveniences
    // -------------------------------------------------------------------------

    /// Upload and immediately commit.
    pub fn put(&self, name: &str, content: &[u8]) -> Result<()> {
        self.upload(name, content)?;
        self.commit()
    }

    /// One-shot download.
    pub fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.download(name)
    }

    // -------------------------------------------------------------------------
    // Fan-out plumbing
    // -------------------------------------------------------------------------

    /// Backends that accepted an upload in the current transaction.
    fn cohort(&self) -> Vec<&Backend> {
        self.backends.iter().filter(|b| b.in_transaction()).collect()
    }

    fn fan_out<T, F>(&self, op: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&Backend) -> Result<T> + Sync,
    {
        let all: Vec<&Backend> = self.backends.iter().collect();
        self.fan_out_over(&all, op)
    }

    /// Run `op` against each backend on its own thread and collect every
    /// outcome. Failure accounting is per backend; aggregation is the
    /// caller's decision.
    fn fan_out_over<T, F>(&self, backends: &[&Backend], op: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&Backend) -> Result<T> + Sync,
    {
        let op = &op;
        thread::scope(|scope| {
            let handles: Vec<_> = backends
                .iter()
                .map(|&backend| scope.spawn(move || op(backend)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(NetstoreError::Network("backend worker panicked".to_string()))
                    })
                })
                .collect()
        })
    }

    /// At-least-one aggregation: any success wins; otherwise surface one
    /// of the failures (a server rejection over mere unreachability).
    fn aggregate<T>(&self, results: Vec<Result<T>>, op: &'static str) -> Result<()> {
        let total = results.len();
        let mut rejection = None;
        let mut successes = 0;
        for result in results {
            match result {
                Ok(_) => successes += 1,
                Err(err @ NetstoreError::Rejected(_)) => rejection = Some(err),
                Err(_) => {}
            }
        }
        debug!(request = op, successes, total);
        if successes > 0 {
            Ok(())
        } else {
            Err(rejection.unwrap_or(NetstoreError::BackendUnavailable))
        }
    }
}
