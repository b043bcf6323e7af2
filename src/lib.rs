//! # netstore
//!
//! Shared file storage for fleets of stateless application servers:
//! - Length-framed binary TCP protocol with SHA-512 integrity verification
//! - Transactional uploads: per-session staging, atomic commit via rename
//! - Process-wide upload locking across concurrent sessions
//! - Client-side proxy that fans operations over redundant backends
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Proxy Client                           │
//! │        (fan-out writes, priority-ordered downloads)          │
//! └────────┬─────────────────────┬─────────────────────┬─────────┘
//!          │                     │                     │
//!          ▼                     ▼                     ▼
//!   ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!   │  Backend 1  │       │  Backend 2  │  ...  │  Backend N  │
//!   │ TCP Server  │       │ TCP Server  │       │ TCP Server  │
//!   └──────┬──────┘       └─────────────┘       └─────────────┘
//!          │
//! ┌────────▼─────────────────────────────────────────────────────┐
//! │                   Session (per connection)                   │
//! │    upload → staging area      commit → rename into store     │
//! └────────┬──────────────────────────────┬──────────────────────┘
//!          │                              │
//!          ▼                              ▼
//!   ┌─────────────┐                ┌─────────────┐
//!   │   Staging   │                │  FileStore  │
//!   │  (private)  │                │  (durable)  │
//!   └─────────────┘                └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod store;
pub mod network;
pub mod client;
pub mod proxy;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NetstoreError, Result};
pub use config::Config;
pub use client::BackendClient;
pub use proxy::{ProxyClient, ProxyConfig};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of netstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
