use std::fs;
use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::filemanager::{DATA_DIR, HINT_DIR};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Lay out the `data/` and `hint/` directories of a store root.
pub fn store_dirs(root: &Path) {
    init_tracing();
    fs::create_dir_all(root.join(DATA_DIR)).unwrap();
    fs::create_dir_all(root.join(HINT_DIR)).unwrap();
}
