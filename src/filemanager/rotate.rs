//! Size-rotating record writer.

use std::path::PathBuf;

use tracing::info;

use super::FileManagerError;
use crate::datafile;
use crate::record::{self, now_micros};

/// Callback producing the path of the next file to rotate into.
///
/// File identity (sequential ID or merge index) is entirely the callback's
/// concern — the writer only decides *when* to rotate.
pub type NextPathFn = Box<dyn FnMut() -> PathBuf + Send + Sync>;

/// Appends records across a series of data files, rotating to a fresh file
/// once the current one grows past the configured threshold.
///
/// Not internally locked — the owning file manager serializes access.
///
/// Rotation is evaluated *after* each write: a record is never split and a
/// single record within the hard size caps is admitted even when it pushes
/// the file past the threshold. The oversized file is simply sealed and the
/// next write opens a successor.
pub struct RotatingWriter {
    writer: Option<record::Writer>,
    current_path: PathBuf,
    max_datafile_size: u64,
    buffered: bool,
    rotate_pending: bool,
    next_path: NextPathFn,
}

impl std::fmt::Debug for RotatingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingWriter")
            .field("writer", &self.writer)
            .field("current_path", &self.current_path)
            .field("max_datafile_size", &self.max_datafile_size)
            .field("buffered", &self.buffered)
            .field("rotate_pending", &self.rotate_pending)
            .field("next_path", &"<callback>")
            .finish()
    }
}

impl RotatingWriter {
    /// Create a writer that rotates at `max_datafile_size` bytes, asking
    /// `next_path` for each new file. No file is opened until the first
    /// write.
    pub fn new(max_datafile_size: u64, buffered: bool, next_path: NextPathFn) -> Self {
        RotatingWriter {
            writer: None,
            current_path: PathBuf::new(),
            max_datafile_size,
            buffered,
            rotate_pending: false,
            next_path,
        }
    }

    /// Append one record. Returns the path of the file written to and the
    /// absolute offset of the record header within it.
    pub fn write(
        &mut self,
        key: &[u8],
        value: &[u8],
        is_tombstone: bool,
    ) -> Result<(PathBuf, u64), FileManagerError> {
        self.write_inner(key, value, is_tombstone, None)
    }

    /// Append one record carrying a caller-supplied timestamp (merge path).
    pub fn write_with_timestamp(
        &mut self,
        key: &[u8],
        value: &[u8],
        is_tombstone: bool,
        timestamp: u64,
    ) -> Result<(PathBuf, u64), FileManagerError> {
        self.write_inner(key, value, is_tombstone, Some(timestamp))
    }

    fn write_inner(
        &mut self,
        key: &[u8],
        value: &[u8],
        is_tombstone: bool,
        timestamp: Option<u64>,
    ) -> Result<(PathBuf, u64), FileManagerError> {
        if self.rotate_pending || self.writer.is_none() {
            self.roll()?;
        }
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => {
                return Err(FileManagerError::Internal(
                    "rotating writer has no open encoder".into(),
                ))
            }
        };

        let offset = match (is_tombstone, timestamp) {
            (false, None) => writer.write_put(key, value)?,
            (false, Some(ts)) => writer.write_put_with_timestamp(key, value, ts)?,
            (true, None) => writer.write_delete(key)?,
            (true, Some(ts)) => writer.write_delete_with_timestamp(key, ts)?,
        };

        if writer.position() > self.max_datafile_size {
            self.rotate_pending = true;
        }

        Ok((self.current_path.clone(), offset))
    }

    /// Seal the current file (if any) and open the next one with a fresh
    /// data-file header.
    fn roll(&mut self) -> Result<(), FileManagerError> {
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }

        let path = (self.next_path)();
        datafile::write_file_header(&path, now_micros())?;

        let writer = if self.buffered {
            record::Writer::create_buffered(&path)?
        } else {
            record::Writer::create(&path)?
        };

        info!("rotated to new data file {}", path.display());
        self.current_path = path;
        self.writer = Some(writer);
        self.rotate_pending = false;
        Ok(())
    }

    /// Resume appending to an existing, already-validated data file instead
    /// of rotating on the first write (continue-active open policy).
    pub fn adopt(&mut self, path: PathBuf) -> Result<(), FileManagerError> {
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }

        let writer = if self.buffered {
            record::Writer::create_buffered(&path)?
        } else {
            record::Writer::create(&path)?
        };

        info!("resuming appends to data file {}", path.display());
        self.current_path = path;
        self.writer = Some(writer);
        self.rotate_pending = false;
        Ok(())
    }

    /// Flush and fsync the current file, if one is open.
    pub fn sync(&mut self) -> Result<(), FileManagerError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.sync()?;
        }
        Ok(())
    }

    /// Sync and release the current file. Subsequent writes rotate to a new
    /// one.
    pub fn close(&mut self) -> Result<(), FileManagerError> {
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}
