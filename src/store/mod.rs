//! The `DataStore` facade.
//!
//! Ties the subsystems together behind the public surface: a keydir for
//! lookups, a file manager for disk I/O, and a meta file for identity and
//! configuration. See the [crate-level documentation](crate) for the overall
//! architecture.
//!
//! # Concurrency model
//!
//! Two locks coordinate everything:
//!
//! - `mu` — a reader–writer lock over the keydir. Reads (`get`,
//!   `list_keys`, `size`) hold it shared for the *entire* lookup-plus-read
//!   sequence, so a concurrent merge reseat can never hand them a
//!   half-updated view. Writes (`put`, `delete`, `sync`, `close`) hold it
//!   exclusive, which totally orders them.
//! - `merge_lock` — a single-slot mutex; only one merge runs at a time.
//!   Merge does **not** hold `mu` for its duration — it takes `mu` briefly
//!   per record probe and for the final reseat, so reads and writes proceed
//!   while compaction runs.
//!
//! The file manager has its own internal lock; lock acquisition is always
//! `mu` first, file manager second.
//!
//! # Guarantees
//!
//! - **Read-your-writes:** a successful `put` is visible to every
//!   subsequent `get` on any thread.
//! - **Last-write-wins:** writes are totally ordered by `mu`.
//! - **Durability on sync:** data reaches the OS on every write but is only
//!   guaranteed on disk after `sync` returns.
//! - **Merge transparency:** `get` results are unaffected by a concurrent
//!   `merge` — each key observes either its pre-merge or post-merge
//!   location, both of which hold the same bytes.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

mod merge;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{error, info};

use crate::datafile::DATA_FILE_HEADER_SIZE;
use crate::filemanager::{FileManager, FileManagerError, OpenPolicy, DATA_DIR, HINT_DIR};
use crate::hintfile::HintFileError;
use crate::keydir::Keydir;
use crate::metafile::{self, MetaData, MetaFileError, STORE_TYPE};
use crate::record::{now_micros, RecordError};

/// Default rotation threshold for data files, in bytes.
pub const DEFAULT_MAX_DATAFILE_SIZE: u64 = 128_000_000;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`DataStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested key is not present in the store.
    #[error("key not found")]
    KeyNotFound,

    /// No store exists at the given path.
    #[error("no data store exists at {0}")]
    StoreNotExist(PathBuf),

    /// A store already exists at the path given to `create`.
    #[error("a data store already exists at {0}")]
    StoreAlreadyExists(PathBuf),

    /// The path given to `create` points at a non-empty directory or a file.
    #[error("path {0} is not an empty directory")]
    PathNotEmpty(PathBuf),

    /// The meta file does not identify a kvdb store.
    #[error("not a kvdb store (type = {0:?})")]
    InvalidStoreType(String),

    /// Error from the meta-file codec.
    #[error("meta file error: {0}")]
    Meta(#[from] MetaFileError),

    /// Error from the record codec.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Error from the hint-file codec.
    #[error("hint file error: {0}")]
    Hint(#[from] HintFileError),

    /// Error from the file manager.
    #[error("file manager error: {0}")]
    FileManager(#[from] FileManagerError),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for creating or opening a [`DataStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Rotation threshold for data files, in bytes. Recorded in the meta
    /// file at create time; on open, the meta file's value is authoritative
    /// and this field is ignored.
    pub max_datafile_size: u64,

    /// How to treat the highest-ID data file when opening.
    pub open_policy: OpenPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_datafile_size: DEFAULT_MAX_DATAFILE_SIZE,
            open_policy: OpenPolicy::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// DataStore
// ------------------------------------------------------------------------------------------------

/// An embedded, persistent key-value store.
///
/// Thread-safe — share it across threads behind an `Arc`. All methods take
/// `&self`; writes are serialized internally.
#[derive(Debug)]
pub struct DataStore {
    root: PathBuf,
    meta: MetaData,
    file_manager: FileManager,
    /// The store-level reader–writer lock (`mu`), guarding the keydir.
    keydir: RwLock<Keydir>,
    /// Serializes merges against each other.
    merge_lock: Mutex<()>,
}

impl DataStore {
    /// Create a new store at `path` with default configuration.
    ///
    /// The path must be nonexistent or an empty directory.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<DataStore> {
        Self::create_with_config(path, StoreConfig::default())
    }

    /// Create a new store at `path` with the given configuration.
    pub fn create_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<DataStore> {
        let root = path.as_ref().to_path_buf();
        validate_new_store_path(&root)?;

        fs::create_dir_all(&root)?;

        let meta = MetaData {
            store_type: STORE_TYPE.to_string(),
            version: crate::VERSION.to_string(),
            created: now_micros().to_string(),
            max_datafile_size: config.max_datafile_size,
        };
        metafile::write_meta_file(&root, &meta)?;

        fs::create_dir(root.join(DATA_DIR))?;
        fs::create_dir(root.join(HINT_DIR))?;

        let file_manager =
            FileManager::open(&root, config.max_datafile_size, OpenPolicy::RotateOnOpen)?;

        info!("created data store at {}", root.display());
        Ok(DataStore {
            root,
            meta,
            file_manager,
            keydir: RwLock::new(Keydir::new()),
            merge_lock: Mutex::new(()),
        })
    }

    /// Open the existing store at `path` with the default open policy.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DataStore> {
        Self::open_with_policy(path, OpenPolicy::default())
    }

    /// Open the existing store at `path`.
    ///
    /// The rotation threshold comes from the store's meta file, not from
    /// the library default — a store keeps the policy it was created with.
    pub fn open_with_policy<P: AsRef<Path>>(path: P, policy: OpenPolicy) -> Result<DataStore> {
        let root = path.as_ref().to_path_buf();
        if !metafile::is_store(&root) {
            return Err(StoreError::StoreNotExist(root));
        }

        let meta = metafile::read_meta_file(&root)?;
        if meta.store_type != STORE_TYPE {
            return Err(StoreError::InvalidStoreType(meta.store_type));
        }

        let file_manager = FileManager::open(&root, meta.max_datafile_size, policy)?;
        let keydir = file_manager.build_keydir()?;

        info!(
            "opened data store at {} ({} live keys)",
            root.display(),
            keydir.len()
        );
        Ok(DataStore {
            root,
            meta,
            file_manager,
            keydir: RwLock::new(keydir),
            merge_lock: Mutex::new(()),
        })
    }

    pub(crate) fn keydir_read(&self) -> Result<RwLockReadGuard<'_, Keydir>> {
        self.keydir
            .read()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    pub(crate) fn keydir_write(&self) -> Result<RwLockWriteGuard<'_, Keydir>> {
        self.keydir
            .write()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    pub(crate) fn file_manager(&self) -> &FileManager {
        &self.file_manager
    }

    /// Root directory of the store.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Rotation threshold the store was created with.
    pub fn max_datafile_size(&self) -> u64 {
        self.meta.max_datafile_size
    }

    /// Look up the value for `key`.
    ///
    /// Returns [`StoreError::KeyNotFound`] when the key was never written or
    /// its latest record is a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        // Hold `mu` shared across lookup *and* read, so the record the
        // entry points at cannot be merged away underneath us.
        let keydir = self.keydir_read()?;
        let entry = keydir.get(key).ok_or(StoreError::KeyNotFound)?;
        let value = self
            .file_manager
            .read_value(entry.file_id, entry.value_pos)?;
        Ok(value)
    }

    /// Set the value for `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut keydir = self.keydir_write()?;
        let (file_id, offset) = self.file_manager.write(key, value, false)?;
        keydir.put(
            key,
            file_id,
            value.len() as u32,
            offset - DATA_FILE_HEADER_SIZE,
            now_micros(),
        );
        Ok(())
    }

    /// Delete `key`. Writing a tombstone for a key that does not exist is
    /// not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_with_exists(key).map(|_| ())
    }

    /// Delete `key`, reporting whether it was present beforehand.
    pub fn delete_with_exists(&self, key: &[u8]) -> Result<bool> {
        let mut keydir = self.keydir_write()?;
        self.file_manager.write(key, &[], true)?;
        Ok(keydir.delete(key))
    }

    /// All live keys, in unspecified order. Intended for diagnostics and
    /// pattern queries at outer layers.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.keydir_read()?.keys())
    }

    /// Number of live keys.
    pub fn size(&self) -> Result<usize> {
        Ok(self.keydir_read()?.len())
    }

    /// Force all written data to durable storage.
    pub fn sync(&self) -> Result<()> {
        let _keydir = self.keydir_write()?;
        self.file_manager.sync()?;
        Ok(())
    }

    /// Sync and release all file handles. Idempotent; every operation after
    /// a reopen sees the same data.
    pub fn close(&self) -> Result<()> {
        let _keydir = self.keydir_write()?;
        self.file_manager.sync()?;
        self.file_manager.close()?;
        Ok(())
    }
}

impl Drop for DataStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("failed to close data store on drop: {e}");
        }
    }
}

/// Check that `path` can host a brand-new store: nothing there, or an
/// empty directory.
fn validate_new_store_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if !path.is_dir() {
        return Err(StoreError::PathNotEmpty(path.to_path_buf()));
    }
    if metafile::is_store(path) {
        return Err(StoreError::StoreAlreadyExists(path.to_path_buf()));
    }
    if fs::read_dir(path)?.next().is_some() {
        return Err(StoreError::PathNotEmpty(path.to_path_buf()));
    }
    Ok(())
}
