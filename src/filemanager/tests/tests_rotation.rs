use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use super::helpers::init_tracing;
use crate::datafile::{self, DATA_FILE_HEADER_SIZE};
use crate::filemanager::RotatingWriter;
use crate::record::{Reader, Writer};

/// A rotating writer whose callback hands out `file-1`, `file-2`, … inside
/// `dir`, and a counter tracking how many files were requested.
fn sequential_writer(dir: &std::path::Path, max_size: u64) -> (RotatingWriter, Arc<AtomicU32>) {
    init_tracing();
    let counter = Arc::new(AtomicU32::new(0));
    let cb_counter = Arc::clone(&counter);
    let dir = dir.to_path_buf();
    let writer = RotatingWriter::new(
        max_size,
        false,
        Box::new(move || {
            let n = cb_counter.fetch_add(1, Ordering::SeqCst) + 1;
            dir.join(format!("file-{n}"))
        }),
    );
    (writer, counter)
}

#[test]
fn no_file_is_created_before_the_first_write() {
    let tmp = TempDir::new().unwrap();
    let (mut writer, counter) = sequential_writer(tmp.path(), 1024);

    writer.sync().unwrap();
    writer.close().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn first_write_creates_a_headered_file() {
    let tmp = TempDir::new().unwrap();
    let (mut writer, counter) = sequential_writer(tmp.path(), 1024);

    let (path, offset) = writer.write(b"k", b"v", false).unwrap();
    assert_eq!(path, tmp.path().join("file-1"));
    assert_eq!(offset, DATA_FILE_HEADER_SIZE);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    writer.close().unwrap();
    datafile::read_file_header(&path).unwrap();
}

#[test]
fn rotation_happens_after_the_threshold_is_crossed() {
    let tmp = TempDir::new().unwrap();
    // Each record is 20 + 3 + 10 + 4 = 37 bytes; threshold of 100 admits
    // the header plus three records into the first file.
    let (mut writer, _) = sequential_writer(tmp.path(), 100);

    let (p1, _) = writer.write(b"aaa", b"0123456789", false).unwrap();
    let (p2, _) = writer.write(b"bbb", b"0123456789", false).unwrap();
    // 19 + 2*37 = 93 ≤ 100, so the second write does not trip rotation...
    assert_eq!(p1, p2);

    // ...the third does (93 + 37 = 130 > 100), but only takes effect on the
    // write after it.
    let (p3, _) = writer.write(b"ccc", b"0123456789", false).unwrap();
    assert_eq!(p3, p1);

    let (p4, offset) = writer.write(b"ddd", b"0123456789", false).unwrap();
    assert_eq!(p4, tmp.path().join("file-2"));
    assert_eq!(offset, DATA_FILE_HEADER_SIZE);
    writer.close().unwrap();

    // Both files carry a valid preamble.
    datafile::read_file_header(&p1).unwrap();
    datafile::read_file_header(&p4).unwrap();
}

#[test]
fn a_single_record_past_the_threshold_is_admitted() {
    let tmp = TempDir::new().unwrap();
    let (mut writer, _) = sequential_writer(tmp.path(), 64);

    // Far larger than the threshold, still within the hard caps.
    let value = vec![0xEE; 4096];
    let (p1, _) = writer.write(b"big", &value, false).unwrap();
    assert_eq!(p1, tmp.path().join("file-1"));

    // The oversized file is sealed; the next record opens file-2.
    let (p2, _) = writer.write(b"next", b"v", false).unwrap();
    assert_eq!(p2, tmp.path().join("file-2"));
    writer.close().unwrap();
}

#[test]
fn tombstones_rotate_like_puts() {
    let tmp = TempDir::new().unwrap();
    let (mut writer, _) = sequential_writer(tmp.path(), 30);

    let (p1, _) = writer.write(b"k", b"v", false).unwrap();
    let (p2, _) = writer.write(b"k", b"", true).unwrap();
    assert_ne!(p1, p2);
    writer.close().unwrap();

    let reader = Reader::open(&p2).unwrap();
    let record = reader.read_record_strict(0).unwrap();
    assert!(record.header.is_tombstone());
}

#[test]
fn preserved_timestamps_flow_through_rotation() {
    let tmp = TempDir::new().unwrap();
    let (mut writer, _) = sequential_writer(tmp.path(), 1024);

    let (path, offset) = writer
        .write_with_timestamp(b"k", b"v", false, 7_777_777)
        .unwrap();
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap();
    let record = reader
        .read_record_strict(offset - DATA_FILE_HEADER_SIZE)
        .unwrap();
    assert_eq!(record.header.timestamp, 7_777_777);
}

#[test]
fn adopt_resumes_an_existing_file() {
    let tmp = TempDir::new().unwrap();
    init_tracing();

    // A data file with one record already in it.
    let existing = tmp.path().join("file-7");
    datafile::write_file_header(&existing, 1).unwrap();
    let mut seed = Writer::create(&existing).unwrap();
    seed.write_put(b"old", b"value").unwrap();
    let resume_at = seed.position();
    seed.close().unwrap();

    let called: PathBuf = existing.clone();
    let mut writer = RotatingWriter::new(
        1024,
        false,
        Box::new(move || called.join("never-used")),
    );
    writer.adopt(existing.clone()).unwrap();

    let (path, offset) = writer.write(b"new", b"value", false).unwrap();
    assert_eq!(path, existing);
    assert_eq!(offset, resume_at);
    writer.close().unwrap();

    // Both the old and the new record are intact.
    let reader = Reader::open(&existing).unwrap();
    assert_eq!(reader.read_value(0).unwrap(), b"value");
    assert_eq!(
        reader.read_key(resume_at - DATA_FILE_HEADER_SIZE).unwrap(),
        b"new"
    );
}
