//! TCP Server
//!
//! Accepts connections and dispatches to worker threads.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::config::Config;
use crate::error::{NetstoreError, Result};
use crate::store::{FileStore, LockRegistry};

use super::Session;

/// Message sent to worker threads
enum WorkerMessage {
    /// New client connection to handle
    NewConnection(TcpStream),
    /// Signal to shutdown
    Shutdown,
}

/// TCP server for netstore
///
/// ## Architecture
/// - Main thread accepts connections
/// - Worker thread pool handles client I/O; a connection occupies its
///   worker until the peer disconnects, since sessions are stateful
/// - Shared FileStore and LockRegistry references for all workers
pub struct Server {
    /// Server configuration
    config: Arc<Config>,

    /// Shared persistent store
    store: Arc<FileStore>,

    /// Process-wide upload locks
    locks: Arc<LockRegistry>,

    /// TCP listener (created on bind)
    listener: Option<TcpListener>,

    /// Channel to send work to workers
    work_sender: Option<Sender<WorkerMessage>>,

    /// Worker thread handles
    workers: Vec<JoinHandle<()>>,

    /// Shutdown flag
    shutdown: Arc<AtomicBool>,

    /// Active connection count
    active_connections: Arc<AtomicUsize>,

    /// Session id generator
    next_session_id: Arc<AtomicU64>,
}

impl Server {
    /// Create a new server with the given config and store
    pub fn new(config: Config, store: Arc<FileStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            locks: Arc::new(LockRegistry::new()),
            listener: None,
            work_sender: None,
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Bind the listener without entering the accept loop. Useful when the
    /// caller needs the bound address before `run()` (e.g. `:0` ports).
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.listen_addr).map_err(|e| {
            NetstoreError::Network(format!(
                "Failed to bind to {}: {}",
                self.config.listen_addr, e
            ))
        })?;

        // Set non-blocking so we can check the shutdown flag
        listener.set_nonblocking(true)?;

        let addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", addr);
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Start the server (blocking)
    ///
    /// This method:
    /// 1. Binds to the configured address (unless `bind()` already ran)
    /// 2. Spawns worker threads
    /// 3. Accepts connections in a loop
    /// 4. Returns when shutdown is signaled
    pub fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind()?;
        }

        // Worker pool; each worker owns one live connection at a time
        let num_workers = self.config.worker_threads.max(1);
        let (sender, receiver) = bounded::<WorkerMessage>(self.config.max_connections);
        self.work_sender = Some(sender);

        tracing::info!("Starting {} worker threads", num_workers);

        for worker_id in 0..num_workers {
            let worker = Worker::new(
                worker_id,
                receiver.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.locks),
                Arc::clone(&self.config),
                Arc::clone(&self.active_connections),
                Arc::clone(&self.next_session_id),
            );
            let handle = thread::Builder::new()
                .name(format!("netstore-worker-{}", worker_id))
                .spawn(move || worker.run())
                .map_err(|e| NetstoreError::Network(format!("Failed to spawn worker: {}", e)))?;

            self.workers.push(handle);
        }

        self.accept_loop()?;
        self.cleanup();

        Ok(())
    }

    /// Main accept loop
    fn accept_loop(&mut self) -> Result<()> {
        let listener = self.listener.as_ref().expect("listener bound in run()");
        let sender = self.work_sender.as_ref().expect("sender created in run()");

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    // Check connection limit
                    let current = self.active_connections.load(Ordering::Relaxed);
                    if current >= self.config.max_connections {
                        tracing::warn!(
                            "Connection limit reached ({}/{}), rejecting {}",
                            current,
                            self.config.max_connections,
                            addr
                        );
                        drop(stream);
                        continue;
                    }

                    tracing::debug!("Accepted connection from {}", addr);

                    // Sessions block on socket reads; hand back to blocking mode
                    if let Err(e) = stream.set_nonblocking(false) {
                        tracing::error!("Failed to configure connection: {}", e);
                        continue;
                    }

                    if let Err(e) = sender.send(WorkerMessage::NewConnection(stream)) {
                        tracing::error!("Failed to dispatch connection: {}", e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // No pending connections, sleep briefly
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::Relaxed) {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Cleanup workers and resources
    fn cleanup(&mut self) {
        tracing::info!("Shutting down server...");

        if let Some(sender) = &self.work_sender {
            for _ in 0..self.workers.len() {
                let _ = sender.send(WorkerMessage::Shutdown);
            }
        }

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                tracing::error!("Worker thread panicked: {:?}", e);
            }
        }

        tracing::info!("Server shutdown complete");
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        tracing::info!("Shutdown signal received");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    /// Get the number of active connections
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get the bound address (if bound)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

/// Worker thread that handles client connections
struct Worker {
    /// Worker ID for logging
    id: usize,

    /// Channel to receive work
    receiver: Receiver<WorkerMessage>,

    store: Arc<FileStore>,
    locks: Arc<LockRegistry>,
    config: Arc<Config>,

    /// Active connection counter
    active_connections: Arc<AtomicUsize>,

    /// Session id generator shared with all workers
    next_session_id: Arc<AtomicU64>,
}

impl Worker {
    fn new(
        id: usize,
        receiver: Receiver<WorkerMessage>,
        store: Arc<FileStore>,
        locks: Arc<LockRegistry>,
        config: Arc<Config>,
        active_connections: Arc<AtomicUsize>,
        next_session_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            id,
            receiver,
            store,
            locks,
            config,
            active_connections,
            next_session_id,
        }
    }

    fn run(self) {
        tracing::debug!("Worker {} started", self.id);

        loop {
            match self.receiver.recv() {
                Ok(WorkerMessage::NewConnection(stream)) => {
                    self.handle_connection(stream);
                }
                Ok(WorkerMessage::Shutdown) => {
                    tracing::debug!("Worker {} received shutdown signal", self.id);
                    break;
                }
                Err(_) => {
                    tracing::debug!("Worker {} channel closed", self.id);
                    break;
                }
            }
        }

        tracing::debug!("Worker {} stopped", self.id);
    }

    fn handle_connection(&self, stream: TcpStream) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let mut session = match Session::new(
            stream,
            session_id,
            Arc::clone(&self.store),
            Arc::clone(&self.locks),
            Arc::clone(&self.config),
        ) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to create session: {}", e);
                self.active_connections.fetch_sub(1, Ordering::Relaxed);
                return;
            }
        };

        if let Err(e) =
            session.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms)
        {
            tracing::warn!("Failed to set connection timeouts: {}", e);
        }

        if let Err(e) = session.handle() {
            tracing::debug!("Session {} ended with error: {}", session.peer_addr(), e);
        }

        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}
