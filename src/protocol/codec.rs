//! Protocol codec
//!
//! Field-level encoding and decoding over byte streams.
//!
//! Reads may be short and are retried until the exact byte count is
//! obtained (`read_exact`). A connection closing in the middle of a framed
//! quantity is a protocol error; blobs are never materialized in memory,
//! they stream through a fixed-size chunk buffer with an incremental
//! SHA-512 running alongside.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha512};

use crate::error::{NetstoreError, Result};
use super::{Status, CHUNK_SIZE, DIGEST_LEN};

/// Map a short read inside a frame to a protocol error. Other I/O failures
/// pass through untouched.
fn eof_is_protocol(err: io::Error, what: &str) -> NetstoreError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        NetstoreError::Protocol(format!("connection closed while reading {}", what))
    } else {
        NetstoreError::Io(err)
    }
}

// =============================================================================
// Reading
// =============================================================================

/// Read the next request tag byte.
///
/// Returns `None` if the peer closed the connection at a message boundary,
/// which is the protocol's only end-of-session signal.
pub fn read_tag<R: Read>(reader: &mut R) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(buf[0])),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(NetstoreError::Io(e)),
    }
}

/// Read a single byte that must be present.
pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader
        .read_exact(&mut buf)
        .map_err(|e| eof_is_protocol(e, "status byte"))?;
    Ok(buf[0])
}

/// Read a response status byte.
pub fn read_status<R: Read>(reader: &mut R) -> Result<Status> {
    Ok(Status::from_wire(read_u8(reader)?))
}

/// Read a big-endian signed 32-bit integer.
pub fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| eof_is_protocol(e, "i32 field"))?;
    Ok(i32::from_be_bytes(buf))
}

/// Read a big-endian signed 64-bit integer.
pub fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|e| eof_is_protocol(e, "i64 field"))?;
    Ok(i64::from_be_bytes(buf))
}

/// Read an i32 length prefix, rejecting negative and oversize values.
pub fn read_len32<R: Read>(reader: &mut R, max: usize) -> Result<usize> {
    let len = read_i32(reader)?;
    if len < 0 {
        return Err(NetstoreError::Protocol(format!("negative length: {}", len)));
    }
    let len = len as usize;
    if len > max {
        return Err(NetstoreError::Protocol(format!(
            "length {} exceeds maximum {}",
            len, max
        )));
    }
    Ok(len)
}

/// Read an i64 length prefix, rejecting negative and oversize values.
pub fn read_len64<R: Read>(reader: &mut R, max: u64) -> Result<u64> {
    let len = read_i64(reader)?;
    if len < 0 {
        return Err(NetstoreError::Protocol(format!("negative length: {}", len)));
    }
    let len = len as u64;
    if len > max {
        return Err(NetstoreError::Protocol(format!(
            "length {} exceeds maximum {}",
            len, max
        )));
    }
    Ok(len)
}

/// Read a length-prefixed UTF-8 string.
pub fn read_string<R: Read>(reader: &mut R, max_len: usize) -> Result<String> {
    let len = read_len32(reader, max_len)?;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| eof_is_protocol(e, "string bytes"))?;
    String::from_utf8(buf)
        .map_err(|e| NetstoreError::Protocol(format!("invalid UTF-8 in string: {}", e)))
}

/// Read an exact run of blob bytes into `buf`.
pub fn read_bytes<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|e| eof_is_protocol(e, "blob content"))?;
    Ok(())
}

/// Read a 64-byte SHA-512 digest.
pub fn read_digest<R: Read>(reader: &mut R) -> Result<[u8; DIGEST_LEN]> {
    let mut digest = [0u8; DIGEST_LEN];
    reader
        .read_exact(&mut digest)
        .map_err(|e| eof_is_protocol(e, "digest"))?;
    Ok(digest)
}

// =============================================================================
// Writing
// =============================================================================

/// Write a request tag byte.
pub fn write_tag<W: Write>(writer: &mut W, tag: u8) -> Result<()> {
    writer.write_all(&[tag])?;
    Ok(())
}

/// Write a response status byte.
pub fn write_status<W: Write>(writer: &mut W, status: Status) -> Result<()> {
    writer.write_all(&[status as u8])?;
    Ok(())
}

/// Write a big-endian signed 64-bit integer.
pub fn write_i64<W: Write>(writer: &mut W, value: i64) -> Result<()> {
    writer.write_all(&value.to_be_bytes())?;
    Ok(())
}

/// Write a length-prefixed UTF-8 string.
pub fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    let len = i32::try_from(value.len())
        .map_err(|_| NetstoreError::Protocol(format!("string too long: {} bytes", value.len())))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

/// Write a 64-byte SHA-512 digest.
pub fn write_digest<W: Write>(writer: &mut W, digest: &[u8; DIGEST_LEN]) -> Result<()> {
    writer.write_all(digest)?;
    Ok(())
}

// =============================================================================
// Streamed Copies
// =============================================================================

/// Copy exactly `len` bytes from `reader` to `writer` in fixed-size chunks,
/// returning the SHA-512 of everything copied. The blob is never held in
/// memory as a whole.
pub fn copy_hashed<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
) -> Result<[u8; DIGEST_LEN]> {
    let mut sha = Sha512::new();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut remaining = len;

    while remaining > 0 {
        let take = remaining.min(CHUNK_SIZE as u64) as usize;
        reader
            .read_exact(&mut buf[..take])
            .map_err(|e| eof_is_protocol(e, "blob content"))?;
        sha.update(&buf[..take]);
        writer.write_all(&buf[..take])?;
        remaining -= take as u64;
    }

    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&sha.finalize());
    Ok(digest)
}

/// Consume and discard exactly `len` bytes.
///
/// Used to resynchronize after a request is rejected mid-payload: the full
/// declared payload is still read so the session can keep serving.
pub fn drain<R: Read>(reader: &mut R, len: u64) -> Result<()> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut remaining = len;

    while remaining > 0 {
        let take = remaining.min(CHUNK_SIZE as u64) as usize;
        reader
            .read_exact(&mut buf[..take])
            .map_err(|e| eof_is_protocol(e, "discarded payload"))?;
        remaining -= take as u64;
    }
    Ok(())
}
