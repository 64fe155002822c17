//! Sequential (streaming) side of the record codec.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crc32fast::Hasher as Crc32;

use super::{
    map_eof, RecordError, RecordHeader, MAX_KEY_SIZE, MAX_VALUE_SIZE, RECORD_HEADER_SIZE, U32_SIZE,
};
use crate::datafile::DATA_FILE_HEADER_SIZE;

/// Read-ahead buffer for sequential scans.
const SCANNER_BUFFER_SIZE: usize = 4 * 1000 * 1000;

/// Extra scratch-buffer headroom beyond the maximum key + value size.
const SCRATCH_SLACK: usize = 128;

/// A record yielded by [`Scanner::next_record`].
///
/// The key and value slices alias the scanner's scratch buffer: they stay
/// valid only until the next `next_record` call (the borrow checker enforces
/// this). Callers that need the data beyond that point must copy it.
#[derive(Debug)]
pub struct RecordView<'a> {
    /// Record metadata.
    pub header: RecordHeader,
    /// Key bytes, borrowed from the scanner's scratch buffer.
    pub key: &'a [u8],
    /// Value bytes, borrowed from the scanner's scratch buffer.
    pub value: &'a [u8],
}

/// Streams records of a data file in file order.
///
/// Intended for whole-file passes (merge, keydir build) — point lookups go
/// through [`super::Reader`] instead. Reads are buffered and every record's
/// CRC is verified. A clean end of file at a record boundary terminates the
/// scan; anything else mid-record is an error.
pub struct Scanner {
    reader: BufReader<File>,
    /// Offset of the next record, relative to the first record.
    offset: u64,
    header_buf: [u8; RECORD_HEADER_SIZE],
    scratch: Vec<u8>,
}

impl Scanner {
    /// Open the data file at `path` and position the scanner at the first
    /// record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::with_capacity(SCANNER_BUFFER_SIZE, file);

        // Skip the data-file preamble.
        let mut header = [0u8; DATA_FILE_HEADER_SIZE as usize];
        reader.read_exact(&mut header).map_err(map_eof)?;

        Ok(Scanner {
            reader,
            offset: 0,
            header_buf: [0u8; RECORD_HEADER_SIZE],
            scratch: vec![0u8; MAX_KEY_SIZE + MAX_VALUE_SIZE + SCRATCH_SLACK],
        })
    }

    /// Yield the next record and its start offset, or `None` at a clean end
    /// of file.
    pub fn next_record(&mut self) -> Result<Option<(RecordView<'_>, u64)>, RecordError> {
        // A clean EOF is only legal on a record boundary.
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let record_offset = self.offset;

        self.reader
            .read_exact(&mut self.header_buf)
            .map_err(map_eof)?;
        let header = RecordHeader::decode(&self.header_buf)?;

        let mut hasher = Crc32::new();
        hasher.update(&self.header_buf);

        let key_len = header.key_size as usize;
        let value_len = header.value_size as usize;

        {
            let (key_buf, rest) = self.scratch.split_at_mut(key_len);
            let value_buf = &mut rest[..value_len];
            self.reader.read_exact(key_buf).map_err(map_eof)?;
            hasher.update(key_buf);
            self.reader.read_exact(value_buf).map_err(map_eof)?;
            hasher.update(value_buf);
        }

        let mut crc_buf = [0u8; U32_SIZE];
        self.reader.read_exact(&mut crc_buf).map_err(map_eof)?;
        if u32::from_le_bytes(crc_buf) != hasher.finalize() {
            return Err(RecordError::CrcMismatch);
        }

        self.offset += header.record_size();

        let (key, rest) = self.scratch.split_at(key_len);
        let value = &rest[..value_len];
        Ok(Some((RecordView { header, key, value }, record_offset)))
    }
}
