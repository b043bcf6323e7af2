//! Backend client
//!
//! One TCP session against a single storage server. Operations are
//! sequential write-then-read on a single stream, following the same
//! pattern as Redis clients: no cloned socket handles, reads go through
//! the buffer and writes through `get_mut()`.
//!
//! Uploads performed on this session stay invisible to other clients
//! until `commit()`; dropping the client without committing rolls the
//! transaction back server-side.

use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{NetstoreError, Result};
use crate::protocol::{self, RequestKind, Status, DEFAULT_MAX_NAME_LEN};

/// A client session with a single backend
pub struct BackendClient {
    stream: BufReader<TcpStream>,
}

impl BackendClient {
    /// Connect without timeouts (blocking until the OS gives up).
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self::from_stream(stream))
    }

    /// Connect with a bounded connect phase and per-operation socket
    /// timeouts (0 disables either).
    pub fn connect_with(addr: &str, connect_timeout_ms: u64, io_timeout_ms: u64) -> Result<Self> {
        let mut last_err: Option<std::io::Error> = None;
        for sock_addr in addr.to_socket_addrs()? {
            let attempt = if connect_timeout_ms > 0 {
                TcpStream::connect_timeout(&sock_addr, Duration::from_millis(connect_timeout_ms))
            } else {
                TcpStream::connect(sock_addr)
            };
            match attempt {
                Ok(stream) => {
                    if io_timeout_ms > 0 {
                        let timeout = Some(Duration::from_millis(io_timeout_ms));
                        stream.set_read_timeout(timeout)?;
                        stream.set_write_timeout(timeout)?;
                    }
                    return Ok(Self::from_stream(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => NetstoreError::Io(e),
            None => NetstoreError::Network(format!("address resolved to nothing: {}", addr)),
        })
    }

    fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Upload `content` under `name` into the current transaction.
    pub fn upload(&mut self, name: &str, content: &[u8]) -> Result<()> {
        let mut reader = content;
        let len = content.len() as u64;
        self.upload_from(name, &mut reader, len)
    }

    /// Upload `len` bytes read from `reader`, streaming them to the server
    /// with an incremental SHA-512 so the blob is never buffered whole.
    pub fn upload_from<R: Read>(&mut self, name: &str, reader: &mut R, len: u64) -> Result<()> {
        let stream = self.stream.get_mut();
        protocol::write_tag(stream, RequestKind::Upload as u8)?;
        protocol::write_string(stream, name)?;
        protocol::write_i64(stream, len as i64)?;
        let digest = protocol::copy_hashed(reader, stream, len)?;
        protocol::write_digest(stream, &digest)?;

        let status = protocol::read_status(&mut self.stream)?;
        debug!(name = %name, len, ok = status.is_ok(), "upload");
        if status.is_ok() {
            Ok(())
        } else {
            Err(NetstoreError::Rejected("upload"))
        }
    }

    /// Download `name` into memory.
    pub fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        self.download_to(name, &mut content)?;
        Ok(content)
    }

    /// Download `name`, streaming the content into `writer`, and verify the
    /// server's digest against one recomputed while receiving. On a digest
    /// mismatch the (bad) bytes have already reached `writer`; callers that
    /// care should write to scratch storage and discard on error.
    pub fn download_to<W: Write>(&mut self, name: &str, writer: &mut W) -> Result<u64> {
        let stream = self.stream.get_mut();
        protocol::write_tag(stream, RequestKind::Download as u8)?;
        protocol::write_string(stream, name)?;

        let status = protocol::read_status(&mut self.stream)?;
        if !status.is_ok() {
            return Err(NetstoreError::NotFound(name.to_string()));
        }

        let echoed = protocol::read_string(&mut self.stream, DEFAULT_MAX_NAME_LEN)?;
        if echoed != name {
            return Err(NetstoreError::Protocol(format!(
                "server echoed name {:?} for download of {:?}",
                echoed, name
            )));
        }
        let len = protocol::read_len64(&mut self.stream, i64::MAX as u64)?;
        let digest = protocol::copy_hashed(&mut self.stream, writer, len)?;
        let expected = protocol::read_digest(&mut self.stream)?;
        if digest != expected {
            return Err(NetstoreError::HashMismatch(name.to_string()));
        }
        debug!(name = %name, len, "download");
        Ok(len)
    }

    /// Ask the server to re-verify everything staged in this transaction.
    pub fn prepare(&mut self) -> Result<()> {
        self.simple_request(RequestKind::Prepare, "prepare")
    }

    /// Promote every upload of this transaction into the visible store.
    pub fn commit(&mut self) -> Result<()> {
        self.simple_request(RequestKind::Commit, "commit")
    }

    /// Discard every upload of this transaction.
    pub fn rollback(&mut self) -> Result<()> {
        self.simple_request(RequestKind::Rollback, "rollback")
    }

    fn simple_request(&mut self, kind: RequestKind, op: &'static str) -> Result<()> {
        protocol::write_tag(self.stream.get_mut(), kind as u8)?;
        let status = protocol::read_status(&mut self.stream)?;
        debug!(request = op, ok = status.is_ok());
        if status == Status::Ok {
            Ok(())
        } else {
            Err(NetstoreError::Rejected(op))
        }
    }
}
