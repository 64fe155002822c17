//! Store meta file.
//!
//! Every store root carries a human-readable identity file,
//! `kvdb_store.meta`, written once at creation and read once at open:
//!
//! ```text
//! type=kvdb
//! version=2.0.0
//! created=1700000000000000
//! max_datafile_size=128000000
//! ```
//!
//! The `type` line identifies the directory as a kvdb store; the
//! `max_datafile_size` value read at open is authoritative for the rotation
//! threshold, so a store keeps the file-size policy it was created with even
//! if the library default changes.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

/// Name of the meta file inside a store root.
pub const META_FILE_NAME: &str = "kvdb_store.meta";

/// Value of the `type` line identifying a kvdb store.
pub const STORE_TYPE: &str = "kvdb";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by meta-file operations.
#[derive(Debug, Error)]
pub enum MetaFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The meta file exists but carries no recognizable fields.
    #[error("meta file is empty or unrecognizable")]
    Empty,

    /// A field failed to parse.
    #[error("invalid meta field {field}: {value}")]
    InvalidField {
        /// Field name as it appears in the file.
        field: &'static str,
        /// The offending value.
        value: String,
    },
}

// ------------------------------------------------------------------------------------------------
// Meta data
// ------------------------------------------------------------------------------------------------

/// Contents of the store meta file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaData {
    /// Store type marker; [`STORE_TYPE`] for stores this library created.
    pub store_type: String,
    /// Version of the library that created the store.
    pub version: String,
    /// Creation time as recorded by the creator.
    pub created: String,
    /// Rotation threshold for data files, in bytes.
    pub max_datafile_size: u64,
}

/// True when `path` points at a directory containing a meta file.
pub fn is_store(path: &Path) -> bool {
    path.is_dir() && path.join(META_FILE_NAME).is_file()
}

/// Read and parse the meta file inside the store root at `root`.
///
/// Unrecognized lines are ignored for forward compatibility.
pub fn read_meta_file(root: &Path) -> Result<MetaData, MetaFileError> {
    let mut file = File::open(root.join(META_FILE_NAME))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let mut meta = MetaData {
        store_type: String::new(),
        version: String::new(),
        created: String::new(),
        max_datafile_size: 0,
    };
    let mut seen_any = false;

    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "type" => meta.store_type = value.to_string(),
            "version" => meta.version = value.to_string(),
            "created" => meta.created = value.to_string(),
            "max_datafile_size" => {
                meta.max_datafile_size =
                    value.parse().map_err(|_| MetaFileError::InvalidField {
                        field: "max_datafile_size",
                        value: value.to_string(),
                    })?;
            }
            _ => continue,
        }
        seen_any = true;
    }

    if !seen_any {
        return Err(MetaFileError::Empty);
    }
    Ok(meta)
}

/// Write the meta file inside the store root at `root`.
pub fn write_meta_file(root: &Path, meta: &MetaData) -> Result<(), MetaFileError> {
    let file = fs::File::create(root.join(META_FILE_NAME))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "type={}", meta.store_type)?;
    writeln!(writer, "version={}", meta.version)?;
    writeln!(writer, "created={}", meta.created)?;
    writeln!(writer, "max_datafile_size={}", meta.max_datafile_size)?;

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
