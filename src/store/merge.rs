//! The merge (compaction) engine.
//!
//! Merge reclaims the space held by stale records: it streams every
//! immutable data file, copies only the records the keydir still cites into
//! fresh files, writes hint sidecars for them, atomically gives the fresh
//! files real file IDs, points the keydir at the new locations, and deletes
//! the originals.
//!
//! # Correctness under concurrent traffic
//!
//! Merge holds [`merge_lock`] for its duration but takes the store lock
//! `mu` only briefly — once shared per scanned record, and exclusively for
//! the rename and reseat phases. Two checks make this safe:
//!
//! 1. **Copy filter (scan time):** a record is copied only when the keydir
//!    entry cites exactly this file *and* this offset. Any concurrent PUT or
//!    DELETE moves the entry elsewhere, so the stale record is skipped.
//! 2. **Reseat filter (commit time):** the keydir is repointed only when the
//!    entry *still* cites the file the record was copied from. A write that
//!    landed between scan and commit wins; the merged copy is simply never
//!    referenced and dies with the next merge.
//!
//! Records are rewritten with their **original timestamps** — the copy is
//! the same logical observation, just relocated. That timestamp may be
//! older than a concurrent PUT's, which is exactly why the reseat goes
//! through [`Keydir::reseat`] (file-ID equality) rather than the
//! timestamp-guarded [`Keydir::put`].
//!
//! # Error policy
//!
//! An immutable file that cannot be opened for scanning is skipped with a
//! warning and kept on disk — its live records stay readable and become
//! candidates again in the next merge. A record-level error (CRC mismatch,
//! short read, oversized field) in a file that *did* open aborts the whole
//! merge; nothing has been deleted at that point, so the store is unharmed.
//!
//! [`merge_lock`]: DataStore::merge
//! [`Keydir::reseat`]: crate::keydir::Keydir::reseat
//! [`Keydir::put`]: crate::keydir::Keydir::put

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use super::{DataStore, Result, StoreError};
use crate::datafile::DATA_FILE_HEADER_SIZE;
use crate::filemanager::HINT_DIR;
use crate::hintfile;
use crate::record;

/// Where a surviving record was copied to, pending the keydir reseat.
struct PendingRemap {
    /// Record-relative offset in the merge file.
    new_value_pos: u64,
    /// Immutable file the record was copied from.
    source_file_id: u32,
    /// Merge temporary the record was copied into.
    merge_path: PathBuf,
}

impl DataStore {
    /// Compact all immutable data files.
    ///
    /// Runs concurrently with reads and writes; only one merge runs at a
    /// time. See the [module documentation](self) for the algorithm and its
    /// guarantees.
    pub fn merge(&self) -> Result<()> {
        let _merge_guard = self
            .merge_lock
            .lock()
            .map_err(|_| StoreError::Internal("merge lock poisoned".into()))?;

        // 1. Snapshot the immutable set. The active file is excluded by
        //    construction; files rotated in later have higher IDs.
        let immutable = self.file_manager().immutable_file_ids()?;
        if immutable.is_empty() {
            return Ok(());
        }
        info!("merge started over {} immutable files", immutable.len());

        // 2. Scan every immutable file, copying live records.
        let mut merge_writer = self.file_manager().new_merge_writer();
        let mut hint_writer: Option<hintfile::Writer> = None;
        let mut current_merge_path = PathBuf::new();
        let mut remaps: HashMap<Vec<u8>, PendingRemap> = HashMap::new();
        let mut scanned_ids: Vec<u32> = Vec::new();

        for &file_id in &immutable {
            let data_path = self.file_manager().data_file_path(file_id);
            let mut scanner = match record::Scanner::open(&data_path) {
                Ok(scanner) => scanner,
                Err(e) => {
                    warn!("merge: cannot open data file {file_id} ({e}), skipping it");
                    continue;
                }
            };
            scanned_ids.push(file_id);

            while let Some((rec, offset)) = scanner.next_record()? {
                // Copy only the observation the keydir currently cites.
                let cited = {
                    let keydir = self.keydir_read()?;
                    keydir.get(rec.key)
                };
                match cited {
                    Some(entry) if entry.file_id == file_id && entry.value_pos == offset => {}
                    _ => continue,
                }

                // Tombstones are not propagated: once every older version
                // of the key is gone from the immutable set, the
                // tombstone's work is done.
                if rec.header.is_tombstone() {
                    continue;
                }

                let (merge_path, new_offset) = merge_writer.write_with_timestamp(
                    rec.key,
                    rec.value,
                    false,
                    rec.header.timestamp,
                )?;

                // The hint writer follows the merge writer's rotations.
                if merge_path != current_merge_path {
                    if let Some(writer) = hint_writer.take() {
                        writer.close()?;
                    }
                    hint_writer = Some(hintfile::Writer::create(
                        self.merge_hint_path(&merge_path)?,
                    )?);
                    current_merge_path = merge_path.clone();
                }

                let new_value_pos = new_offset - DATA_FILE_HEADER_SIZE;
                if let Some(writer) = hint_writer.as_mut() {
                    writer.write(
                        rec.header.timestamp,
                        rec.header.value_size,
                        new_value_pos,
                        rec.key,
                    )?;
                }

                remaps.insert(
                    rec.key.to_vec(),
                    PendingRemap {
                        new_value_pos,
                        source_file_id: file_id,
                        merge_path,
                    },
                );
            }
        }

        // 3. Finalize the output files before anything references them.
        if let Some(writer) = hint_writer.take() {
            writer.close()?;
        }
        merge_writer.sync()?;
        merge_writer.close()?;
        let merge_paths = merge_writer.file_paths();

        // 4. Give the temporaries their real IDs, atomically with respect
        //    to writers: reserving under `mu` exclusive means no rotation
        //    can interleave and claim one of these IDs.
        let mut real_ids: HashMap<PathBuf, u32> = HashMap::new();
        if !merge_paths.is_empty() {
            let _keydir = self.keydir_write()?;
            let start_id = self
                .file_manager()
                .reserve_next_file_ids(merge_paths.len() as u32);

            for (i, merge_path) in merge_paths.iter().enumerate() {
                let file_id = start_id + i as u32;
                fs::rename(merge_path, self.file_manager().data_file_path(file_id))?;
                fs::rename(
                    self.merge_hint_path(merge_path)?,
                    self.file_manager().hint_file_path(file_id),
                )?;
                real_ids.insert(merge_path.clone(), file_id);
            }
        }

        // 5. Reseat the keydir. Only entries still citing the scanned file
        //    move; anything a concurrent write touched stays put.
        {
            let mut keydir = self.keydir_write()?;
            for (key, remap) in &remaps {
                if let Some(&new_file_id) = real_ids.get(&remap.merge_path) {
                    keydir.reseat(key, remap.source_file_id, new_file_id, remap.new_value_pos);
                }
            }
        }

        // 6. Drop the merged-out originals and their cached readers.
        for &file_id in &scanned_ids {
            let data_path = self.file_manager().data_file_path(file_id);
            if let Err(e) = fs::remove_file(&data_path) {
                warn!("merge: could not remove {}: {e}", data_path.display());
            }
            let hint_path = self.file_manager().hint_file_path(file_id);
            match fs::remove_file(&hint_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("merge: could not remove {}: {e}", hint_path.display()),
            }
        }
        self.file_manager().close_and_remove_readers(&scanned_ids)?;

        info!(
            "merge finished: {} files compacted into {}, {} live records copied",
            scanned_ids.len(),
            merge_paths.len(),
            remaps.len()
        );
        Ok(())
    }

    /// Hint-sidecar path for a merge temporary: same base name, under
    /// `hint/`.
    fn merge_hint_path(&self, merge_path: &std::path::Path) -> Result<PathBuf> {
        let name = merge_path.file_name().ok_or_else(|| {
            StoreError::Internal(format!(
                "merge file path has no file name: {}",
                merge_path.display()
            ))
        })?;
        Ok(self.root.join(HINT_DIR).join(name))
    }
}
