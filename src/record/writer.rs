//! Append-side of the record codec.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crc32fast::Hasher as Crc32;

use super::{
    check_sizes, now_micros, RecordError, RecordHeader, RECORD_HEADER_SIZE, RECORD_TYPE_DELETE,
    RECORD_TYPE_PUT,
};

/// Buffer size used in buffered mode (merge path).
const WRITER_BUFFER_SIZE: usize = 4 * 1000 * 1000;

/// Output sink — either a raw file handle or a large in-memory buffer in
/// front of one.
#[derive(Debug)]
enum Sink {
    Plain(File),
    Buffered(BufWriter<File>),
}

impl Sink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Sink::Plain(file) => file.write_all(buf),
            Sink::Buffered(writer) => writer.write_all(buf),
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(file) => file.sync_all(),
            Sink::Buffered(writer) => {
                writer.flush()?;
                writer.get_ref().sync_all()
            }
        }
    }
}

/// Appends log records to a data file.
///
/// Not internally locked — callers serialize access (the rotating writer is
/// held under the file manager's write lock).
///
/// In the default mode every write is handed to the OS immediately, so the
/// returned offsets always correspond to bytes the kernel has accepted.
/// Buffered mode (≈4 MB) batches writes for the merge path; [`Writer::sync`]
/// is then mandatory before the file contents are observable on disk.
#[derive(Debug)]
pub struct Writer {
    sink: Sink,
    header_buf: [u8; RECORD_HEADER_SIZE],
    position: u64,
}

impl Writer {
    /// Open the file at `path` for appending, unbuffered.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        Self::open_inner(path.as_ref(), false)
    }

    /// Open the file at `path` for appending with a large write buffer.
    pub fn create_buffered<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        Self::open_inner(path.as_ref(), true)
    }

    fn open_inner(path: &Path, buffered: bool) -> Result<Self, RecordError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        // The next record lands at the current end of the file.
        let position = file.metadata()?.len();

        let sink = if buffered {
            Sink::Buffered(BufWriter::with_capacity(WRITER_BUFFER_SIZE, file))
        } else {
            Sink::Plain(file)
        };

        Ok(Writer {
            sink,
            header_buf: [0u8; RECORD_HEADER_SIZE],
            position,
        })
    }

    /// Absolute file offset where the next record will begin.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append a PUT record stamped with the current wall-clock time.
    ///
    /// Returns the absolute file offset at which the record header begins.
    pub fn write_put(&mut self, key: &[u8], value: &[u8]) -> Result<u64, RecordError> {
        self.write_record(key, value, RECORD_TYPE_PUT, now_micros())
    }

    /// Append a DELETE (tombstone) record stamped with the current wall-clock
    /// time.
    pub fn write_delete(&mut self, key: &[u8]) -> Result<u64, RecordError> {
        self.write_record(key, &[], RECORD_TYPE_DELETE, now_micros())
    }

    /// Append a PUT record carrying a caller-supplied timestamp.
    ///
    /// Used by the merge engine, which must preserve the original record's
    /// timestamp when rewriting it.
    pub fn write_put_with_timestamp(
        &mut self,
        key: &[u8],
        value: &[u8],
        timestamp: u64,
    ) -> Result<u64, RecordError> {
        self.write_record(key, value, RECORD_TYPE_PUT, timestamp)
    }

    /// Append a DELETE record carrying a caller-supplied timestamp.
    pub fn write_delete_with_timestamp(
        &mut self,
        key: &[u8],
        timestamp: u64,
    ) -> Result<u64, RecordError> {
        self.write_record(key, &[], RECORD_TYPE_DELETE, timestamp)
    }

    fn write_record(
        &mut self,
        key: &[u8],
        value: &[u8],
        record_type: u8,
        timestamp: u64,
    ) -> Result<u64, RecordError> {
        check_sizes(key, value)?;

        let header = RecordHeader {
            timestamp,
            key_size: key.len() as u32,
            value_size: value.len() as u32,
            record_type,
            value_type: 0,
        };
        header.encode_into(&mut self.header_buf);

        let mut hasher = Crc32::new();
        hasher.update(&self.header_buf);
        hasher.update(key);
        hasher.update(value);
        let checksum = hasher.finalize();

        let start = self.position;
        self.sink.write_all(&self.header_buf)?;
        self.sink.write_all(key)?;
        self.sink.write_all(value)?;
        self.sink.write_all(&checksum.to_le_bytes())?;

        self.position += header.record_size();
        Ok(start)
    }

    /// Flush any internal buffer and fsync the file.
    pub fn sync(&mut self) -> Result<(), RecordError> {
        self.sink.sync()?;
        Ok(())
    }

    /// Sync and release the file.
    pub fn close(mut self) -> Result<(), RecordError> {
        self.sync()
    }
}
