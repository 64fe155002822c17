//! Log record codec.
//!
//! A data file is an append-only sequence of self-describing, CRC32-protected
//! records following the 19-byte data-file preamble (see [`crate::datafile`]).
//! This module provides the three access paths to those records:
//!
//! - [`Writer`] — append records to the end of a data file.
//! - [`Reader`] — random access by offset, safe for concurrent use through
//!   positional reads (`pread`).
//! - [`Scanner`] — sequential streaming over a whole file through a shared
//!   scratch buffer, used by the merge engine and the keydir build.
//!
//! # On-disk layout
//!
//! ```text
//! [TIMESTAMP_US_LE (8)][KEY_SZ_LE (4)][VALUE_SZ_LE (4)][TYPE (1)][VTYPE (1)][RESERVED (2)]
//! [KEY_BYTES][VALUE_BYTES][CRC32_LE (4)]
//! ```
//!
//! - **Type** — `0x50` for a PUT, `0x44` for a DELETE (tombstone).
//! - **Value bytes** — empty for a tombstone.
//! - **CRC32** — CRC32-IEEE over header, key, and value bytes.
//!
//! # Offsets
//!
//! All offsets exchanged with [`Reader`] and [`Scanner`] are relative to the
//! **first record** — the codec accounts for the data-file preamble
//! internally. [`Writer`] reports absolute file offsets because rotation
//! decisions are made on raw file size.
//!
//! # Guarantees
//!
//! - **Integrity:** strict reads and sequential scans recompute the CRC and
//!   fail with [`RecordError::CrcMismatch`] on any disagreement.
//! - **Bounded decoding:** key and value sizes decoded from a header are
//!   validated against the hard caps before any allocation or read, so a
//!   corrupted length field cannot trigger an oversized read.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

mod reader;
mod scanner;
mod writer;

pub use reader::Reader;
pub use scanner::{RecordView, Scanner};
pub use writer::Writer;

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Size of the fixed record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 20;

/// Hard cap on key length in bytes.
pub const MAX_KEY_SIZE: usize = 1024;

/// Hard cap on value length in bytes.
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Record type marker for a PUT.
pub const RECORD_TYPE_PUT: u8 = 0x50;

/// Record type marker for a DELETE (tombstone).
pub const RECORD_TYPE_DELETE: u8 = 0x44;

pub(crate) const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Wall-clock time in microseconds since the Unix epoch.
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by record codec operations.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Data integrity failure — stored CRC did not match the recomputed one.
    #[error("crc checksum does not match stored value")]
    CrcMismatch,

    /// Key length exceeds [`MAX_KEY_SIZE`].
    #[error("key too large ({0} bytes)")]
    KeyTooLarge(usize),

    /// Value length exceeds [`MAX_VALUE_SIZE`].
    #[error("value too large ({0} bytes)")]
    ValueTooLarge(usize),

    /// The file ended in the middle of a record.
    #[error("unexpected end of file")]
    UnexpectedEof,
}

// ------------------------------------------------------------------------------------------------
// Record header / record
// ------------------------------------------------------------------------------------------------

/// Fixed-size metadata prefix of every log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record timestamp in microseconds since the Unix epoch.
    pub timestamp: u64,
    /// Length of the key in bytes.
    pub key_size: u32,
    /// Length of the value in bytes (0 for a tombstone).
    pub value_size: u32,
    /// Record type — [`RECORD_TYPE_PUT`] or [`RECORD_TYPE_DELETE`].
    pub record_type: u8,
    /// Value type. Reserved, currently always 0.
    pub value_type: u8,
}

impl RecordHeader {
    /// True when this record is a DELETE tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.record_type == RECORD_TYPE_DELETE
    }

    /// Total on-disk size of the record (header + key + value + CRC).
    pub fn record_size(&self) -> u64 {
        (RECORD_HEADER_SIZE + U32_SIZE) as u64 + u64::from(self.key_size) + u64::from(self.value_size)
    }

    /// Serialize the header into `buf`.
    pub(crate) fn encode_into(&self, buf: &mut [u8; RECORD_HEADER_SIZE]) {
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..12].copy_from_slice(&self.key_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.value_size.to_le_bytes());
        buf[16] = self.record_type;
        buf[17] = self.value_type;
        buf[18] = 0;
        buf[19] = 0;
    }

    /// Deserialize a header from `buf`, validating the size fields.
    ///
    /// Size validation catches header corruption early: a flipped length
    /// byte would otherwise turn into a huge allocation or read.
    pub(crate) fn decode(buf: &[u8; RECORD_HEADER_SIZE]) -> Result<Self, RecordError> {
        let header = RecordHeader {
            timestamp: u64::from_le_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
            key_size: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            value_size: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            record_type: buf[16],
            value_type: buf[17],
        };

        if header.key_size as usize > MAX_KEY_SIZE {
            return Err(RecordError::KeyTooLarge(header.key_size as usize));
        }
        if header.value_size as usize > MAX_VALUE_SIZE {
            return Err(RecordError::ValueTooLarge(header.value_size as usize));
        }

        Ok(header)
    }
}

/// A fully materialized log record, as returned by [`Reader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record metadata.
    pub header: RecordHeader,
    /// Key bytes.
    pub key: Vec<u8>,
    /// Value bytes — empty for a tombstone.
    pub value: Vec<u8>,
}

/// Validate key and value lengths against the hard caps before encoding.
pub(crate) fn check_sizes(key: &[u8], value: &[u8]) -> Result<(), RecordError> {
    if key.len() > MAX_KEY_SIZE {
        return Err(RecordError::KeyTooLarge(key.len()));
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(RecordError::ValueTooLarge(value.len()));
    }
    Ok(())
}

/// Map an `UnexpectedEof` I/O error to the record-level EOF error.
pub(crate) fn map_eof(err: io::Error) -> RecordError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        RecordError::UnexpectedEof
    } else {
        RecordError::Io(err)
    }
}
