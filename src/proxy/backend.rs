//! Backend handle
//!
//! Connection management for one backend inside the proxy: lazy connect,
//! failure-triggered cooldown before the next attempt, and membership in
//! the current logical transaction.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::client::BackendClient;
use crate::error::{NetstoreError, Result};

use super::ProxyConfig;

/// Errors that mean the connection can no longer be trusted. The session is
/// dropped (which rolls back its server-side transaction) and the backend
/// cools down before the next connect attempt.
fn is_transport_error(err: &NetstoreError) -> bool {
    matches!(
        err,
        NetstoreError::Io(_)
            | NetstoreError::Network(_)
            | NetstoreError::Protocol(_)
            | NetstoreError::HashMismatch(_)
    )
}

struct BackendState {
    client: Option<BackendClient>,
    /// Cooldown deadline after a transport failure
    unhealthy_until: Option<Instant>,
    /// Whether this backend accepted an upload in the current transaction
    in_transaction: bool,
}

/// One backend endpoint as seen by the proxy.
///
/// All operations hold the state lock for their duration: per-backend the
/// wire stays strictly sequential, across backends the proxy fans out
/// freely.
pub struct Backend {
    addr: String,
    state: Mutex<BackendState>,
}

impl Backend {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            state: Mutex::new(BackendState {
                client: None,
                unhealthy_until: None,
                in_transaction: false,
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether this backend belongs to the current transaction's cohort.
    pub fn in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    /// Forget transaction membership (after commit/rollback resolution).
    pub fn clear_transaction(&self) {
        self.state.lock().in_transaction = false;
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    pub fn upload(&self, config: &ProxyConfig, name: &str, content: &[u8]) -> Result<()> {
        self.run(config, |client| client.upload(name, content), |state| {
            state.in_transaction = true;
        })
    }

    pub fn download(&self, config: &ProxyConfig, name: &str) -> Result<Vec<u8>> {
        self.run(config, |client| client.download(name), |_| {})
    }

    pub fn prepare(&self, config: &ProxyConfig) -> Result<()> {
        self.run(config, |client| client.prepare(), |_| {})
    }

    pub fn commit(&self, config: &ProxyConfig) -> Result<()> {
        self.run(config, |client| client.commit(), |state| {
            state.in_transaction = false;
        })
    }

    pub fn rollback(&self, config: &ProxyConfig) -> Result<()> {
        self.run(config, |client| client.rollback(), |state| {
            state.in_transaction = false;
        })
    }

    // -------------------------------------------------------------------------
    // Connection management
    // -------------------------------------------------------------------------

    /// Run one operation against a connected client. Transport failures
    /// drop the session and start the cooldown; application-level errors
    /// (rejected, not found) leave the connection healthy and in sync.
    fn run<T>(
        &self,
        config: &ProxyConfig,
        op: impl FnOnce(&mut BackendClient) -> Result<T>,
        on_success: impl FnOnce(&mut BackendState),
    ) -> Result<T> {
        let mut state = self.state.lock();

        if let Some(until) = state.unhealthy_until {
            if Instant::now() < until {
                return Err(NetstoreError::BackendUnavailable);
            }
            state.unhealthy_until = None;
        }

        if state.client.is_none() {
            match BackendClient::connect_with(
                &self.addr,
                config.connect_timeout_ms,
                config.op_timeout_ms,
            ) {
                Ok(client) => {
                    debug!(backend = %self.addr, "connected");
                    state.client = Some(client);
                }
                Err(err) => {
                    warn!(backend = %self.addr, error = %err, "connect failed");
                    self.mark_unhealthy(&mut state, config);
                    return Err(err);
                }
            }
        }

        let client = state.client.as_mut().expect("client connected above");
        match op(client) {
            Ok(value) => {
                on_success(&mut state);
                Ok(value)
            }
            Err(err) => {
                if is_transport_error(&err) {
                    warn!(backend = %self.addr, error = %err, "backend failed");
                    self.mark_unhealthy(&mut state, config);
                }
                Err(err)
            }
        }
    }

    /// Drop the session (the server rolls its transaction back on
    /// disconnect) and refuse new work until the cooldown passes.
    fn mark_unhealthy(&self, state: &mut BackendState, config: &ProxyConfig) {
        state.client = None;
        state.in_transaction = false;
        state.unhealthy_until = Some(Instant::now() + Duration::from_millis(config.cooldown_ms));
    }
}
