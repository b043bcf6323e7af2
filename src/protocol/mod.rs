//! Protocol Module
//!
//! Defines the wire protocol between clients and storage servers.
//!
//! ## Wire Format
//!
//! All integers are big-endian and signed. Strings are UTF-8 with an i32
//! byte-length prefix. Blobs carry an i64 byte-length prefix. Digests are
//! raw 64-byte SHA-512 values. There is no outer framing: a conversation is
//! a pure concatenation of the fields below.
//!
//! ### Requests
//! ```text
//! ┌──────────┬───────────────────────────────────────────────────┐
//! │ Tag (1)  │                     Payload                       │
//! └──────────┴───────────────────────────────────────────────────┘
//! ```
//! - 0x01 UPLOAD:   name_len (4) + name + content_len (8) + content + digest (64)
//! - 0x02 DOWNLOAD: name_len (4) + name
//! - 0x03 PREPARE:  empty
//! - 0x04 COMMIT:   empty
//! - 0x05 ROLLBACK: empty
//!
//! ### Responses
//! One status byte. A successful DOWNLOAD continues with the upload frame
//! shape: name_len (4) + name + content_len (8) + content + digest (64).
//!
//! ### Status Codes
//! - 0x01: OK (same wire value as the UPLOAD tag; readers disambiguate by
//!   operation context)
//! - anything else: ERROR (conventionally 0x02); no error codes or strings
//!   travel on the wire

mod codec;

pub use codec::{
    copy_hashed, drain, read_bytes, read_digest, read_i32, read_i64, read_len32, read_len64,
    read_status, read_string, read_tag, read_u8, write_digest, write_i64, write_status,
    write_string, write_tag,
};

use crate::error::NetstoreError;

/// Byte length of a SHA-512 digest on the wire
pub const DIGEST_LEN: usize = 64;

/// Default cap on logical file name length
pub const DEFAULT_MAX_NAME_LEN: usize = 4096;

/// Chunk size for streamed blob copies
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Request kinds (client → server tag byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestKind {
    Upload = 1,
    Download = 2,
    Prepare = 3,
    Commit = 4,
    Rollback = 5,
}

impl TryFrom<u8> for RequestKind {
    type Error = NetstoreError;

    fn try_from(tag: u8) -> Result<Self, NetstoreError> {
        match tag {
            1 => Ok(RequestKind::Upload),
            2 => Ok(RequestKind::Download),
            3 => Ok(RequestKind::Prepare),
            4 => Ok(RequestKind::Commit),
            5 => Ok(RequestKind::Rollback),
            _ => Err(NetstoreError::Protocol(format!(
                "unknown request tag: 0x{:02x}",
                tag
            ))),
        }
    }
}

/// Response status (server → client)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 1,
    Error = 2,
}

impl Status {
    /// Decode a status byte. Any value other than OK counts as an error.
    pub fn from_wire(byte: u8) -> Status {
        if byte == Status::Ok as u8 {
            Status::Ok
        } else {
            Status::Error
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}
