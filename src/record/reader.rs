//! Positional (random access) side of the record codec.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crc32fast::Hasher as Crc32;

use super::{map_eof, Record, RecordError, RecordHeader, RECORD_HEADER_SIZE, U32_SIZE};
use crate::datafile::DATA_FILE_HEADER_SIZE;

/// Reads log records from a data file by offset.
///
/// All reads go through `pread`, which never moves a shared file cursor, so
/// a single `Reader` can serve many threads concurrently. Offsets are
/// relative to the first record — the 19-byte data-file preamble is added
/// internally.
#[derive(Debug)]
pub struct Reader {
    file: File,
}

impl Reader {
    /// Open the data file at `path` for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let file = File::open(path.as_ref())?;
        Ok(Reader { file })
    }

    /// Read the record at `offset` and verify its CRC.
    ///
    /// Fails with [`RecordError::CrcMismatch`] when the stored checksum does
    /// not match the bytes on disk.
    pub fn read_record_strict(&self, offset: u64) -> Result<Record, RecordError> {
        let mut pos = offset + DATA_FILE_HEADER_SIZE;

        let mut hasher = Crc32::new();
        let header = self.read_header(pos, Some(&mut hasher))?;
        pos += RECORD_HEADER_SIZE as u64;

        let mut key = vec![0u8; header.key_size as usize];
        self.read_exact_at(&mut key, pos)?;
        pos += u64::from(header.key_size);
        hasher.update(&key);

        let mut value = vec![0u8; header.value_size as usize];
        self.read_exact_at(&mut value, pos)?;
        pos += u64::from(header.value_size);
        hasher.update(&value);

        let mut crc_buf = [0u8; U32_SIZE];
        self.read_exact_at(&mut crc_buf, pos)?;
        let stored = u32::from_le_bytes(crc_buf);

        if stored != hasher.finalize() {
            return Err(RecordError::CrcMismatch);
        }

        Ok(Record { header, key, value })
    }

    /// Read only the value of the record at `offset`, skipping the key.
    ///
    /// This is the hot path for point lookups; no CRC verification is done.
    pub fn read_value(&self, offset: u64) -> Result<Vec<u8>, RecordError> {
        let pos = offset + DATA_FILE_HEADER_SIZE;
        let header = self.read_header(pos, None)?;

        let value_pos = pos + RECORD_HEADER_SIZE as u64 + u64::from(header.key_size);
        let mut value = vec![0u8; header.value_size as usize];
        self.read_exact_at(&mut value, value_pos)?;
        Ok(value)
    }

    /// Read only the key of the record at `offset`.
    pub fn read_key(&self, offset: u64) -> Result<Vec<u8>, RecordError> {
        let pos = offset + DATA_FILE_HEADER_SIZE;
        let header = self.read_header(pos, None)?;

        let mut key = vec![0u8; header.key_size as usize];
        self.read_exact_at(&mut key, pos + RECORD_HEADER_SIZE as u64)?;
        Ok(key)
    }

    fn read_header(
        &self,
        abs_offset: u64,
        hasher: Option<&mut Crc32>,
    ) -> Result<RecordHeader, RecordError> {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        self.read_exact_at(&mut buf, abs_offset)?;
        let header = RecordHeader::decode(&buf)?;
        if let Some(hasher) = hasher {
            hasher.update(&buf);
        }
        Ok(header)
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<(), RecordError> {
        self.file.read_exact_at(buf, offset).map_err(map_eof)
    }
}
