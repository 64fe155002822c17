//! Hint-file codec.
//!
//! Hint files are optional sidecars written during merge, one per merged
//! data file, stored under `hint/` with the data file's numeric name and a
//! `.hint` suffix. They summarize where each live key's value lives so that
//! startup can rebuild the keydir without scanning whole data files.
//!
//! # On-disk layout
//!
//! Hint files carry no file header and no per-record CRC — just raw records:
//!
//! ```text
//! [TIMESTAMP_US_LE (8)][KEY_SZ_LE (4)][VALUE_SZ_LE (4)][VALUE_POS_LE (8)][KEY_BYTES]
//! ```
//!
//! `VALUE_POS` is the offset of the corresponding record header in the data
//! file, relative to the first record — exactly the value the keydir stores,
//! so replay is a straight copy.
//!
//! # Corruption handling
//!
//! Without checksums, the only line of defense is size validation: key and
//! value sizes are bounds-checked on read, which catches most length-field
//! corruption. A hint file that fails to open or scan is simply discarded —
//! the keydir build falls back to scanning the data file itself.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::record::{MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Size of the fixed hint-record header in bytes.
pub const HINT_RECORD_HEADER_SIZE: usize = 24;

/// Write and read-ahead buffer size.
const HINT_BUFFER_SIZE: usize = 4 * 1000 * 1000;

/// Extra scratch-buffer headroom beyond the maximum key size.
const SCRATCH_SLACK: usize = 32;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by hint-file operations.
#[derive(Debug, Error)]
pub enum HintFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key length exceeds [`MAX_KEY_SIZE`].
    #[error("hint key too large ({0} bytes)")]
    KeyTooLarge(usize),

    /// Value length exceeds [`MAX_VALUE_SIZE`].
    #[error("hint value too large ({0} bytes)")]
    ValueTooLarge(usize),

    /// The file ended in the middle of a hint record.
    #[error("unexpected end of hint file")]
    UnexpectedEof,
}

fn map_eof(err: io::Error) -> HintFileError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        HintFileError::UnexpectedEof
    } else {
        HintFileError::Io(err)
    }
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Appends hint records to a hint file.
///
/// Writes are buffered (≈4 MB); call [`Writer::sync`] or [`Writer::close`]
/// to push them to disk.
pub struct Writer {
    writer: BufWriter<File>,
    header_buf: [u8; HINT_RECORD_HEADER_SIZE],
}

impl Writer {
    /// Open the hint file at `path` for appending.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, HintFileError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Writer {
            writer: BufWriter::with_capacity(HINT_BUFFER_SIZE, file),
            header_buf: [0u8; HINT_RECORD_HEADER_SIZE],
        })
    }

    /// Append one hint record.
    ///
    /// `value_pos` is the record-header offset in the data file, relative to
    /// the first record. Sizes are validated against the hard caps so a
    /// hint file can never describe a record the store would refuse to read.
    pub fn write(
        &mut self,
        timestamp: u64,
        value_size: u32,
        value_pos: u64,
        key: &[u8],
    ) -> Result<(), HintFileError> {
        if key.len() > MAX_KEY_SIZE {
            return Err(HintFileError::KeyTooLarge(key.len()));
        }
        if value_size as usize > MAX_VALUE_SIZE {
            return Err(HintFileError::ValueTooLarge(value_size as usize));
        }

        self.header_buf[0..8].copy_from_slice(&timestamp.to_le_bytes());
        self.header_buf[8..12].copy_from_slice(&(key.len() as u32).to_le_bytes());
        self.header_buf[12..16].copy_from_slice(&value_size.to_le_bytes());
        self.header_buf[16..24].copy_from_slice(&value_pos.to_le_bytes());

        self.writer.write_all(&self.header_buf)?;
        self.writer.write_all(key)?;
        Ok(())
    }

    /// Flush buffered records and fsync the file.
    pub fn sync(&mut self) -> Result<(), HintFileError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Flush, fsync, and release the file.
    pub fn close(mut self) -> Result<(), HintFileError> {
        self.sync()
    }
}

// ------------------------------------------------------------------------------------------------
// Scanner
// ------------------------------------------------------------------------------------------------

/// A hint record yielded by [`Scanner::next_record`].
///
/// The key slice aliases the scanner's scratch buffer and is invalidated by
/// the next `next_record` call.
#[derive(Debug)]
pub struct HintView<'a> {
    /// Timestamp of the referenced record, microseconds since epoch.
    pub timestamp: u64,
    /// Size of the referenced value in bytes.
    pub value_size: u32,
    /// Record-header offset in the data file, relative to the first record.
    pub value_pos: u64,
    /// Key bytes, borrowed from the scanner's scratch buffer.
    pub key: &'a [u8],
}

/// Streams hint records in file order.
#[derive(Debug)]
pub struct Scanner {
    reader: BufReader<File>,
    scratch: Vec<u8>,
}

impl Scanner {
    /// Open the hint file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HintFileError> {
        let file = File::open(path.as_ref())?;
        Ok(Scanner {
            reader: BufReader::with_capacity(HINT_BUFFER_SIZE, file),
            scratch: vec![0u8; HINT_RECORD_HEADER_SIZE + MAX_KEY_SIZE + SCRATCH_SLACK],
        })
    }

    /// Yield the next hint record, or `None` at a clean end of file.
    pub fn next_record(&mut self) -> Result<Option<HintView<'_>>, HintFileError> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let mut header = [0u8; HINT_RECORD_HEADER_SIZE];
        self.reader.read_exact(&mut header).map_err(map_eof)?;

        let timestamp = u64::from_le_bytes([
            header[0], header[1], header[2], header[3], header[4], header[5], header[6], header[7],
        ]);
        let key_size = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let value_size = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
        let value_pos = u64::from_le_bytes([
            header[16], header[17], header[18], header[19], header[20], header[21], header[22],
            header[23],
        ]);

        // Size validation is the only corruption detection hint files have.
        if key_size as usize > MAX_KEY_SIZE {
            return Err(HintFileError::KeyTooLarge(key_size as usize));
        }
        if value_size as usize > MAX_VALUE_SIZE {
            return Err(HintFileError::ValueTooLarge(value_size as usize));
        }

        let key_buf = &mut self.scratch[..key_size as usize];
        self.reader.read_exact(key_buf).map_err(map_eof)?;

        Ok(Some(HintView {
            timestamp,
            value_size,
            value_pos,
            key: &self.scratch[..key_size as usize],
        }))
    }
}
