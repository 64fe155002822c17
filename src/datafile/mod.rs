//! Data-file header codec.
//!
//! Every data file starts with a fixed 19-byte preamble identifying the file
//! and gating readers by format version.
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC (8)][VER_MAJOR (1)][VER_MINOR (1)][VER_PATCH (1)][CREATED_US_LE (8)]
//! ```
//!
//! - **Magic** — `0x00 'k' 'v' 'd' 'b' 'D' 'A' 'T'`; any mismatch means the
//!   file is not a data file.
//! - **Version** — semantic version of the record format. A reader accepts a
//!   file when the major versions are equal and the file's minor version is
//!   not newer than the reader's.
//! - **Created** — creation timestamp, microseconds since the Unix epoch.
//!
//! Headers are written with exclusive-create semantics: a data file is never
//! reused, so creation fails if the path already exists.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use thiserror::Error;

/// Size of the data-file header in bytes.
pub const DATA_FILE_HEADER_SIZE: u64 = 19;

/// Magic bytes identifying a kvdb data file.
const MAGIC: [u8; 8] = [0x00, b'k', b'v', b'd', b'b', b'D', b'A', b'T'];

const VERSION_MAJOR: u8 = 2;
const VERSION_MINOR: u8 = 0;
const VERSION_PATCH: u8 = 0;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by data-file header operations.
#[derive(Debug, Error)]
pub enum DataFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not begin with the data-file magic bytes.
    #[error("not a kvdb data file")]
    NotDataFile,

    /// The file was written by an incompatible format version.
    #[error("data file version {major}.{minor}.{patch} is not supported by this reader")]
    VersionIncompatible {
        /// Major version recorded in the file.
        major: u8,
        /// Minor version recorded in the file.
        minor: u8,
        /// Patch version recorded in the file.
        patch: u8,
    },
}

// ------------------------------------------------------------------------------------------------
// File header
// ------------------------------------------------------------------------------------------------

/// Decoded data-file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Major format version.
    pub version_major: u8,
    /// Minor format version.
    pub version_minor: u8,
    /// Patch format version.
    pub version_patch: u8,
    /// Creation timestamp in microseconds since the Unix epoch.
    pub timestamp: u64,
}

fn check_version(major: u8, minor: u8, patch: u8) -> Result<(), DataFileError> {
    if major != VERSION_MAJOR || minor > VERSION_MINOR {
        return Err(DataFileError::VersionIncompatible {
            major,
            minor,
            patch,
        });
    }
    Ok(())
}

/// Create the file at `path` and write a data-file header to it.
///
/// Fails if the path already exists — data files are created exactly once.
/// The header is fsynced before returning so a crash cannot leave a data
/// file without a complete preamble.
pub fn write_file_header(path: &Path, timestamp: u64) -> Result<(), DataFileError> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;

    let mut buf = [0u8; DATA_FILE_HEADER_SIZE as usize];
    buf[..8].copy_from_slice(&MAGIC);
    buf[8] = VERSION_MAJOR;
    buf[9] = VERSION_MINOR;
    buf[10] = VERSION_PATCH;
    buf[11..19].copy_from_slice(&timestamp.to_le_bytes());

    file.write_all(&buf)?;
    file.sync_all()?;
    Ok(())
}

/// Read and validate the data-file header of the file at `path`.
///
/// Returns [`DataFileError::NotDataFile`] on a magic mismatch and
/// [`DataFileError::VersionIncompatible`] when the file's format version is
/// not readable by this build.
pub fn read_file_header(path: &Path) -> Result<FileHeader, DataFileError> {
    let mut file = File::open(path)?;

    let mut buf = [0u8; DATA_FILE_HEADER_SIZE as usize];
    file.read_exact(&mut buf)?;

    if buf[..8] != MAGIC {
        return Err(DataFileError::NotDataFile);
    }

    let header = FileHeader {
        version_major: buf[8],
        version_minor: buf[9],
        version_patch: buf[10],
        timestamp: u64::from_le_bytes([
            buf[11], buf[12], buf[13], buf[14], buf[15], buf[16], buf[17], buf[18],
        ]),
    };
    check_version(header.version_major, header.version_minor, header.version_patch)?;

    Ok(header)
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------
