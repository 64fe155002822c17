//! Tests for the record codec.
//!
//! Tests use `tempfile::TempDir` so files are ephemeral. Corruption tests
//! manipulate the on-disk bytes directly to simulate disk errors.

mod helpers;
