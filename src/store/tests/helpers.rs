use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::filemanager::DATA_DIR;
use crate::store::{DataStore, StoreConfig};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with a tiny rotation threshold so tests produce many small data
/// files without writing much.
pub fn small_file_config() -> StoreConfig {
    init_tracing();
    StoreConfig {
        max_datafile_size: 256,
        ..StoreConfig::default()
    }
}

/// Create a store with the small-file config at `path`.
pub fn create_small(path: &Path) -> DataStore {
    DataStore::create_with_config(path, small_file_config()).unwrap()
}

/// Number of data files currently on disk under the store root.
pub fn data_file_count(root: &Path) -> usize {
    std::fs::read_dir(root.join(DATA_DIR))
        .unwrap()
        .filter_map(|entry| entry.unwrap().file_name().into_string().ok())
        .filter(|name| name.ends_with(".dat"))
        .count()
}
