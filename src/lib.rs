//! # kvdb
//!
//! An embeddable, persistent key-value store built on the **Bitcask**
//! log-structured design. Optimized for O(1) point reads, O(1) appended
//! writes, online compaction, and fast startup via hint files.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       DataStore                          │
//! │   get / put / delete / list_keys / sync / merge          │
//! │        │                                    │            │
//! │        ▼                                    ▼            │
//! │  ┌──────────┐     value location     ┌─────────────┐     │
//! │  │  Keydir  │──────────────────────► │ FileManager │     │
//! │  │ (RwLock) │                        │  readers +  │     │
//! │  └──────────┘                        │   writer    │     │
//! │        ▲                             └──────┬──────┘     │
//! │        │ rebuild on open                    │            │
//! │  ┌─────┴─────┐                       ┌──────▼──────┐     │
//! │  │ hint files│                       │ data files  │     │
//! │  │  (hint/)  │                       │  (data/)    │     │
//! │  └───────────┘                       └─────────────┘     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store`] | `DataStore` facade — create, open, read, write, delete, merge |
//! | [`filemanager`] | Active-file rotation, cached readers, keydir build, merge writers |
//! | [`keydir`] | In-memory key → value-location directory |
//! | [`record`] | CRC32-protected log record codec (append, positional read, scan) |
//! | [`hintfile`] | Compact index sidecars for fast keydir reconstruction |
//! | [`datafile`] | Version-gated data-file preamble |
//! | [`metafile`] | Store identity and configuration (`kvdb_store.meta`) |
//!
//! ## Key properties
//!
//! - **Append-only durability** — every mutation is a self-describing,
//!   checksummed record appended to the active data file.
//! - **Single writer, many readers** — writes are serialized by a store-level
//!   lock; reads go through shared positional readers.
//! - **Online merge** — immutable files are compacted while reads and writes
//!   continue; a precise (file-id, offset) staleness test guarantees no live
//!   write is ever lost.
//! - **Fast startup** — the keydir is rebuilt from hint files where present,
//!   falling back to a full sequential scan of each data file.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kvdb::DataStore;
//!
//! let store = DataStore::create("/tmp/my_store")?;
//!
//! store.put(b"hello", b"world")?;
//! assert_eq!(store.get(b"hello")?, b"world");
//!
//! store.delete(b"hello")?;
//! assert!(store.get(b"hello").is_err());
//!
//! store.merge()?;
//! store.close()?;
//! # Ok::<(), kvdb::StoreError>(())
//! ```

pub mod datafile;
pub mod filemanager;
pub mod hintfile;
pub mod keydir;
pub mod metafile;
pub mod record;
pub mod store;

pub use filemanager::OpenPolicy;
pub use store::{DataStore, Result, StoreConfig, StoreError};

/// Current version of kvdb.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
