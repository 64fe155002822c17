//! Tests for the hint-file codec.

mod tests_roundtrip;
