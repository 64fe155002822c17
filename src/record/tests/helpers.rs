use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::datafile;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Create an empty data file (preamble only) inside `dir` and return its path.
pub fn new_data_file(dir: &Path) -> PathBuf {
    init_tracing();
    let path = dir.join("0000000001.dat");
    datafile::write_file_header(&path, 1_700_000_000_000_000).unwrap();
    path
}
