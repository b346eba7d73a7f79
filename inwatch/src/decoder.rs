//! Decoding of the packed inotify record stream.
//!
//! A read from the inotify descriptor returns zero or more records back to
//! back. Each record is a fixed 16 byte header in native byte order followed
//! by `name_len` bytes holding a NUL-terminated, NUL-padded name.
//!
//! ```text
//! ┌────────┬────────┬────────┬──────────┬───────────────────────┐
//! │ wd i32 │mask u32│cookie  │ len u32  │ name (len bytes)      │
//! └────────┴────────┴────────┴──────────┴───────────────────────┘
//! ```

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use thiserror::Error;

/// Size of the fixed record header.
pub const HEADER_SIZE: usize = 16;

/// Longest file name the kernel will report.
pub const NAME_MAX: usize = 255;

/// Bytes needed to hold one record of maximum size.
pub const MAX_RECORD_SIZE: usize = HEADER_SIZE + NAME_MAX + 1;

/// A record whose bytes do not fit the protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than [`HEADER_SIZE`] bytes remained where a header was expected.
    #[error("truncated header at offset {offset}: {remaining} bytes left")]
    TruncatedHeader { offset: usize, remaining: usize },

    /// The header announced more name bytes than the buffer holds.
    #[error("truncated name at offset {offset}: header declares {declared} bytes, {remaining} left")]
    TruncatedName {
        offset: usize,
        declared: usize,
        remaining: usize,
    },
}

/// One decoded record, before its watch descriptor is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Watch descriptor, `-1` for queue overflow.
    pub wd: i32,
    /// Raw flag bits.
    pub mask: u32,
    /// Rename correlation cookie, 0 for unpaired events.
    pub cookie: u32,
    /// Name of the child the event is about, `None` for the watched object itself.
    pub name: Option<PathBuf>,
}

/// Lazily walks a buffer of packed records.
///
/// Yields `Err` at most once: after a protocol violation the position of every
/// later record is unknown, so iteration stops.
#[derive(Debug)]
pub struct RecordDecoder<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RecordDecoder<'a> {
    /// Decode records from `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn read_u32(&self, at: usize) -> [u8; 4] {
        let mut field = [0u8; 4];
        field.copy_from_slice(&self.buf[at..at + 4]);
        field
    }

    fn next_record(&mut self) -> Result<RawRecord, DecodeError> {
        let start = self.offset;
        if self.remaining() < HEADER_SIZE {
            return Err(DecodeError::TruncatedHeader {
                offset: start,
                remaining: self.remaining(),
            });
        }

        let wd = i32::from_ne_bytes(self.read_u32(start));
        let mask = u32::from_ne_bytes(self.read_u32(start + 4));
        let cookie = u32::from_ne_bytes(self.read_u32(start + 8));
        let name_len = u32::from_ne_bytes(self.read_u32(start + 12)) as usize;
        self.offset += HEADER_SIZE;

        if name_len > self.remaining() {
            return Err(DecodeError::TruncatedName {
                offset: start,
                declared: name_len,
                remaining: self.remaining(),
            });
        }

        let field = &self.buf[self.offset..self.offset + name_len];
        self.offset += name_len;

        Ok(RawRecord {
            wd,
            mask,
            cookie,
            name: decode_name(field),
        })
    }
}

impl Iterator for RecordDecoder<'_> {
    type Item = Result<RawRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining() == 0 {
            return None;
        }

        let record = self.next_record();
        if record.is_err() {
            self.failed = true;
        }
        Some(record)
    }
}

/// Extract the name from a padded name field.
///
/// A field that starts with NUL (or is empty) carries no name at all. Bytes
/// are kept as-is, so names that are not valid UTF-8 survive the round trip
/// back to the filesystem.
fn decode_name(field: &[u8]) -> Option<PathBuf> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    if end == 0 {
        return None;
    }
    Some(PathBuf::from(OsStr::from_bytes(&field[..end])))
}

#[cfg(test)]
pub(crate) fn encode_record(wd: i32, mask: u32, cookie: u32, name: &[u8], field_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + field_len);
    out.extend_from_slice(&wd.to_ne_bytes());
    out.extend_from_slice(&mask.to_ne_bytes());
    out.extend_from_slice(&cookie.to_ne_bytes());
    out.extend_from_slice(&(field_len as u32).to_ne_bytes());
    let mut field = name.to_vec();
    field.resize(field_len, 0);
    out.extend_from_slice(&field);
    out
}
