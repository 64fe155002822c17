//! Data-file management.
//!
//! The file manager owns everything that touches the `data/` directory of a
//! store: the rotating writer feeding the active file, the cache of shared
//! positional readers, data-file enumeration, keydir reconstruction, and the
//! temporary-file writers used by merge.
//!
//! # File identity
//!
//! Data files are named by a positive, monotonically increasing 10-digit
//! decimal ID with a `.dat` suffix. At any moment exactly one file — the one
//! with the highest ID handed out — is *active* and receives appends; every
//! file with a lower ID is immutable for the rest of its life, until a merge
//! deletes it.
//!
//! By default the first write after opening a store rotates to a brand-new
//! file, which guarantees the immutability of all preexisting files without
//! inspecting their tails (at the cost of burning one file ID per restart).
//! [`OpenPolicy::ContinueActive`] instead validates the highest-ID file by a
//! full sequential scan and resumes appending to it when the scan reaches a
//! clean end of file.
//!
//! # Concurrency model
//!
//! - A reader–writer lock protects the reader cache and the rotating writer.
//! - The active/next ID pair lives behind a small mutex shared with the
//!   rotation callback (lock order: manager lock, then ID mutex).
//! - Cached readers are handed out as `Arc`s; reads never hold the manager
//!   lock while touching the disk.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

mod rotate;

pub use rotate::{NextPathFn, RotatingWriter};

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{info, trace, warn};

use crate::datafile::{self, DataFileError};
use crate::hintfile::{self, HintFileError};
use crate::keydir::{Keydir, KeydirEntry};
use crate::record::{self, RecordError};

/// Directory holding data files, relative to the store root.
pub const DATA_DIR: &str = "data";

/// Directory holding hint files, relative to the store root.
pub const HINT_DIR: &str = "hint";

/// Name prefix of temporary merge output files.
const MERGE_PREFIX: &str = "merge";

/// File name of a data file with the given ID.
pub fn data_file_name(file_id: u32) -> String {
    format!("{file_id:010}.dat")
}

/// File name of the hint sidecar for the given data-file ID.
pub fn hint_file_name(file_id: u32) -> String {
    format!("{file_id:010}.hint")
}

/// Parse a data-file name back into its ID. Anything that is not exactly
/// ten decimal digits plus `.dat` (merge temporaries, stray files) is
/// ignored by returning `None`.
fn parse_data_file_id(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(".dat")?;
    if stem.len() != 10 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by file-manager operations.
#[derive(Debug, Error)]
pub enum FileManagerError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error from the record codec.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Error from the data-file header codec.
    #[error("data file error: {0}")]
    DataFile(#[from] DataFileError),

    /// Error from the hint-file codec.
    #[error("hint file error: {0}")]
    Hint(#[from] HintFileError),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Open policy
// ------------------------------------------------------------------------------------------------

/// How to treat the highest-ID data file when opening an existing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenPolicy {
    /// Rotate to a fresh file on the first write after open. Previously
    /// written files are immutable by construction — no tail inspection
    /// needed — at the cost of one file ID per restart.
    #[default]
    RotateOnOpen,

    /// Scan the highest-ID file; when it ends cleanly and is still below the
    /// rotation threshold, continue appending to it. Falls back to
    /// [`OpenPolicy::RotateOnOpen`] behavior when validation fails.
    ContinueActive,
}

// ------------------------------------------------------------------------------------------------
// File manager
// ------------------------------------------------------------------------------------------------

/// Active/next file-ID pair. Shared with the rotation callback, which
/// allocates IDs as the writer rolls over.
#[derive(Debug)]
struct FileIds {
    active: u32,
    next: u32,
}

#[derive(Debug)]
struct Inner {
    readers: HashMap<u32, Arc<record::Reader>>,
    writer: RotatingWriter,
}

/// Manages the data files of one store: the active append target, the
/// cached readers for immutable files, and the bookkeeping merge needs.
#[derive(Debug)]
pub struct FileManager {
    root: PathBuf,
    data_dir: PathBuf,
    hint_dir: PathBuf,
    max_datafile_size: u64,
    ids: Arc<Mutex<FileIds>>,
    inner: RwLock<Inner>,
}

impl FileManager {
    /// Open a file manager over the store at `root`.
    ///
    /// Scans `data/` for existing files; the highest observed ID becomes the
    /// active file and ID allocation continues from there.
    pub fn open(
        root: &Path,
        max_datafile_size: u64,
        policy: OpenPolicy,
    ) -> Result<Self, FileManagerError> {
        let data_dir = root.join(DATA_DIR);
        let hint_dir = root.join(HINT_DIR);

        let mut max_id = 0u32;
        for entry in fs::read_dir(&data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(parse_data_file_id) {
                max_id = max_id.max(id);
            }
        }

        let ids = Arc::new(Mutex::new(FileIds {
            active: max_id,
            next: max_id + 1,
        }));

        let cb_ids = Arc::clone(&ids);
        let cb_dir = data_dir.clone();
        let mut writer = RotatingWriter::new(
            max_datafile_size,
            false,
            Box::new(move || {
                // The ID pair is two plain integers; a poisoned lock cannot
                // leave them torn, so recover instead of propagating.
                let mut ids = cb_ids.lock().unwrap_or_else(PoisonError::into_inner);
                let id = ids.next;
                ids.next += 1;
                ids.active = id;
                cb_dir.join(data_file_name(id))
            }),
        );

        if policy == OpenPolicy::ContinueActive && max_id > 0 {
            let path = data_dir.join(data_file_name(max_id));
            match validate_tail(&path, max_datafile_size) {
                Ok(true) => writer.adopt(path)?,
                Ok(false) => {
                    info!("active data file {max_id} is at capacity, next write rotates")
                }
                Err(e) => {
                    warn!("tail validation of data file {max_id} failed: {e}; next write rotates")
                }
            }
        }

        info!(
            "file manager opened at {} (active file id {max_id})",
            root.display()
        );

        Ok(FileManager {
            root: root.to_path_buf(),
            data_dir,
            hint_dir,
            max_datafile_size,
            ids,
            inner: RwLock::new(Inner {
                readers: HashMap::new(),
                writer,
            }),
        })
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, Inner>, FileManagerError> {
        self.inner
            .read()
            .map_err(|_| FileManagerError::Internal("RwLock poisoned".into()))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, Inner>, FileManagerError> {
        self.inner
            .write()
            .map_err(|_| FileManagerError::Internal("RwLock poisoned".into()))
    }

    fn lock_ids(&self) -> MutexGuard<'_, FileIds> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Path of the data file with the given ID.
    pub fn data_file_path(&self, file_id: u32) -> PathBuf {
        self.data_dir.join(data_file_name(file_id))
    }

    /// Path of the hint sidecar for the given data-file ID.
    pub fn hint_file_path(&self, file_id: u32) -> PathBuf {
        self.hint_dir.join(hint_file_name(file_id))
    }

    /// ID of the file currently receiving appends.
    pub fn active_file_id(&self) -> u32 {
        self.lock_ids().active
    }

    /// Append one record to the active file.
    ///
    /// Returns the ID of the file the record landed in and the absolute
    /// offset of its header within that file.
    pub fn write(
        &self,
        key: &[u8],
        value: &[u8],
        is_tombstone: bool,
    ) -> Result<(u32, u64), FileManagerError> {
        let mut inner = self.write_lock()?;
        let (_, offset) = inner.writer.write(key, value, is_tombstone)?;
        // The write may have rotated; the callback updated the active ID.
        let file_id = self.lock_ids().active;
        Ok((file_id, offset))
    }

    /// Read the value of the record at `offset` in file `file_id`.
    pub fn read_value(&self, file_id: u32, offset: u64) -> Result<Vec<u8>, FileManagerError> {
        let reader = self.reader(file_id)?;
        Ok(reader.read_value(offset)?)
    }

    /// Read and CRC-verify the whole record at `offset` in file `file_id`.
    pub fn read_record_strict(
        &self,
        file_id: u32,
        offset: u64,
    ) -> Result<record::Record, FileManagerError> {
        let reader = self.reader(file_id)?;
        Ok(reader.read_record_strict(offset)?)
    }

    /// Fetch or create the cached reader for `file_id`.
    ///
    /// Double-checked: probe under the shared lock, then re-probe under the
    /// exclusive lock before inserting, so concurrent readers rarely
    /// contend and a reader is opened at most once.
    fn reader(&self, file_id: u32) -> Result<Arc<record::Reader>, FileManagerError> {
        {
            let inner = self.read_lock()?;
            if let Some(reader) = inner.readers.get(&file_id) {
                return Ok(Arc::clone(reader));
            }
        }

        let mut inner = self.write_lock()?;
        if let Some(reader) = inner.readers.get(&file_id) {
            // Another thread created it while we upgraded.
            return Ok(Arc::clone(reader));
        }

        let reader = Arc::new(record::Reader::open(self.data_file_path(file_id))?);
        inner.readers.insert(file_id, Arc::clone(&reader));
        trace!("opened reader for data file {file_id}");
        Ok(reader)
    }

    /// IDs of all data files that are guaranteed immutable, ascending.
    ///
    /// The active ID is snapshotted first; anything that rotates in after
    /// the snapshot has a higher ID and is excluded, so the returned files
    /// can be scanned without racing the writer.
    pub fn immutable_file_ids(&self) -> Result<Vec<u32>, FileManagerError> {
        let snapshot = self.lock_ids().active;
        let ids = self.sorted_data_file_ids()?;
        Ok(ids.into_iter().filter(|&id| id < snapshot).collect())
    }

    fn sorted_data_file_ids(&self) -> Result<Vec<u32>, FileManagerError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(parse_data_file_id) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Rebuild a keydir from the files on disk.
    ///
    /// Files are replayed in ascending ID order. Each file is loaded from
    /// its hint sidecar when one exists and replays cleanly — hint files
    /// only ever describe live PUTs, so replay is pure insertion —
    /// otherwise the data file is scanned sequentially.
    ///
    /// The keydir's stale-update guard makes PUT replay order-insensitive,
    /// but tombstones need their own bookkeeping: merge gives its output
    /// files IDs *above* the then-active file, so a tombstone can sit in a
    /// lower-ID file than an older, still-live-looking PUT of the same key
    /// (deleted after a merge, before the next one). The build therefore
    /// tracks the newest tombstone timestamp per key and refuses any PUT
    /// that is strictly older — without this, such keys would resurrect on
    /// reopen.
    ///
    /// Files that are not readable data files are logged and skipped;
    /// record-level corruption inside a valid data file aborts the build.
    pub fn build_keydir(&self) -> Result<Keydir, FileManagerError> {
        let mut keydir = Keydir::new();
        // key → newest tombstone timestamp observed so far.
        let mut tombstones: HashMap<Vec<u8>, u64> = HashMap::new();

        for file_id in self.sorted_data_file_ids()? {
            let hint_path = self.hint_file_path(file_id);
            if hint_path.is_file() {
                match replay_hint_file(&hint_path, file_id) {
                    Ok(entries) => {
                        trace!("keydir build: replayed hint file for {file_id}");
                        for (key, entry) in entries {
                            apply_put(&mut keydir, &tombstones, &key, entry);
                        }
                        continue;
                    }
                    Err(e) => {
                        warn!("keydir build: hint file for {file_id} unusable ({e}), scanning data file")
                    }
                }
            }

            let data_path = self.data_file_path(file_id);
            if let Err(e) = datafile::read_file_header(&data_path) {
                warn!("keydir build: skipping {}: {e}", data_path.display());
                continue;
            }

            scan_data_file_into(&data_path, file_id, &mut keydir, &mut tombstones)?;
            trace!("keydir build: scanned data file {file_id}");
        }

        info!("keydir built with {} live keys", keydir.len());
        Ok(keydir)
    }

    /// Create a writer producing temporary merge files (`merge-1`,
    /// `merge-2`, …) in the data directory, buffered, with the same
    /// rotation threshold as the active writer.
    pub fn new_merge_writer(&self) -> MergeWriter {
        let paths = Arc::new(Mutex::new(Vec::new()));
        let cb_paths = Arc::clone(&paths);
        let dir = self.data_dir.clone();
        let mut counter = 0u32;

        let writer = RotatingWriter::new(
            self.max_datafile_size,
            true,
            Box::new(move || {
                counter += 1;
                let path = dir.join(format!("{MERGE_PREFIX}-{counter}"));
                cb_paths
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(path.clone());
                path
            }),
        );

        MergeWriter { writer, paths }
    }

    /// Atomically advance the next-file-ID counter by `n`, returning the
    /// first reserved ID. Merge uses this to claim the real names of its
    /// temporary files.
    pub fn reserve_next_file_ids(&self, n: u32) -> u32 {
        let mut ids = self.lock_ids();
        let first = ids.next;
        ids.next += n;
        first
    }

    /// Drop the cached readers for the given file IDs (used after merge
    /// deletes the files). In-flight reads finish on their own handles.
    pub fn close_and_remove_readers(&self, file_ids: &[u32]) -> Result<(), FileManagerError> {
        let mut inner = self.write_lock()?;
        for file_id in file_ids {
            inner.readers.remove(file_id);
        }
        Ok(())
    }

    /// Flush and fsync the active file.
    pub fn sync(&self) -> Result<(), FileManagerError> {
        let mut inner = self.write_lock()?;
        inner.writer.sync()
    }

    /// Sync and release the active file and all cached readers. Idempotent.
    pub fn close(&self) -> Result<(), FileManagerError> {
        let mut inner = self.write_lock()?;
        inner.writer.close()?;
        inner.readers.clear();
        info!("file manager closed at {}", self.root.display());
        Ok(())
    }
}

/// Validate the tail of `path` for the continue-active open policy: the
/// header must be readable and every record must scan cleanly to EOF.
/// Returns whether the file is also still below the rotation threshold.
fn validate_tail(path: &Path, max_datafile_size: u64) -> Result<bool, FileManagerError> {
    datafile::read_file_header(path)?;
    let mut scanner = record::Scanner::open(path)?;
    while scanner.next_record()?.is_some() {}
    Ok(fs::metadata(path)?.len() <= max_datafile_size)
}

/// Replay a whole hint file into staged keydir entries.
///
/// Staging keeps a half-read, corrupted hint file from leaving partial
/// entries behind: the caller applies the entries only after the entire
/// file has scanned cleanly.
fn replay_hint_file(
    path: &Path,
    file_id: u32,
) -> Result<Vec<(Vec<u8>, KeydirEntry)>, HintFileError> {
    let mut scanner = hintfile::Scanner::open(path)?;
    let mut entries = Vec::new();
    while let Some(hint) = scanner.next_record()? {
        entries.push((
            hint.key.to_vec(),
            KeydirEntry {
                file_id,
                value_size: hint.value_size,
                value_pos: hint.value_pos,
                timestamp: hint.timestamp,
            },
        ));
    }
    Ok(entries)
}

/// Apply one replayed PUT observation, honoring both the keydir's
/// stale-update guard and any newer tombstone seen elsewhere in the build.
///
/// The tombstone comparison is strict so that a PUT landing in the same
/// microsecond as an earlier DELETE of the key still applies — within a
/// file the append order already puts it after the tombstone.
fn apply_put(
    keydir: &mut Keydir,
    tombstones: &HashMap<Vec<u8>, u64>,
    key: &[u8],
    entry: KeydirEntry,
) {
    if let Some(&tombstone_ts) = tombstones.get(key) {
        if tombstone_ts > entry.timestamp {
            return;
        }
    }
    keydir.put(
        key,
        entry.file_id,
        entry.value_size,
        entry.value_pos,
        entry.timestamp,
    );
}

/// Apply one replayed DELETE observation: drop the entry unless a newer PUT
/// already superseded the tombstone, and remember the tombstone's time for
/// PUTs replayed later.
fn apply_delete(
    keydir: &mut Keydir,
    tombstones: &mut HashMap<Vec<u8>, u64>,
    key: &[u8],
    timestamp: u64,
) {
    if let Some(entry) = keydir.get(key) {
        if entry.timestamp <= timestamp {
            keydir.delete(key);
        }
    }
    let recorded = tombstones.entry(key.to_vec()).or_insert(0);
    *recorded = (*recorded).max(timestamp);
}

/// Sequentially scan a data file, applying PUTs and DELETEs to the keydir.
fn scan_data_file_into(
    path: &Path,
    file_id: u32,
    keydir: &mut Keydir,
    tombstones: &mut HashMap<Vec<u8>, u64>,
) -> Result<(), FileManagerError> {
    let mut scanner = record::Scanner::open(path)?;
    while let Some((rec, offset)) = scanner.next_record()? {
        if rec.header.is_tombstone() {
            apply_delete(keydir, tombstones, rec.key, rec.header.timestamp);
        } else {
            apply_put(
                keydir,
                tombstones,
                rec.key,
                KeydirEntry {
                    file_id,
                    value_size: rec.header.value_size,
                    value_pos: offset,
                    timestamp: rec.header.timestamp,
                },
            );
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Merge writer
// ------------------------------------------------------------------------------------------------

/// Buffered rotating writer over temporary merge files.
///
/// Not internally locked — merge runs single-threaded with respect to the
/// writer. [`MergeWriter::sync`] is mandatory before the produced files are
/// complete on disk.
pub struct MergeWriter {
    writer: RotatingWriter,
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl MergeWriter {
    /// Append one record, preserving the supplied timestamp. Returns the
    /// merge-file path written to and the absolute record offset within it.
    pub fn write_with_timestamp(
        &mut self,
        key: &[u8],
        value: &[u8],
        is_tombstone: bool,
        timestamp: u64,
    ) -> Result<(PathBuf, u64), FileManagerError> {
        self.writer
            .write_with_timestamp(key, value, is_tombstone, timestamp)
    }

    /// Flush and fsync the current merge file.
    pub fn sync(&mut self) -> Result<(), FileManagerError> {
        self.writer.sync()
    }

    /// Sync and release the current merge file.
    pub fn close(&mut self) -> Result<(), FileManagerError> {
        self.writer.close()
    }

    /// Paths of all merge files created so far, in creation order.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
