use tempfile::TempDir;

use crate::hintfile::{HintFileError, Scanner, Writer};
use crate::record::MAX_KEY_SIZE;

#[test]
fn round_trips_many_records() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("0000000001.hint");

    let mut writer = Writer::create(&path).unwrap();
    for i in 0..100u64 {
        let key = format!("key_{i:03}");
        writer
            .write(1_000 + i, i as u32, i * 40, key.as_bytes())
            .unwrap();
    }
    writer.close().unwrap();

    let mut scanner = Scanner::open(&path).unwrap();
    let mut i = 0u64;
    while let Some(hint) = scanner.next_record().unwrap() {
        assert_eq!(hint.timestamp, 1_000 + i);
        assert_eq!(hint.value_size, i as u32);
        assert_eq!(hint.value_pos, i * 40);
        assert_eq!(hint.key, format!("key_{i:03}").as_bytes());
        i += 1;
    }
    assert_eq!(i, 100);
}

#[test]
fn empty_file_yields_no_records() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("0000000001.hint");
    Writer::create(&path).unwrap().close().unwrap();

    let mut scanner = Scanner::open(&path).unwrap();
    assert!(scanner.next_record().unwrap().is_none());
}

#[test]
fn records_are_buffered_until_sync() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("0000000001.hint");

    let mut writer = Writer::create(&path).unwrap();
    writer.write(1, 2, 3, b"key").unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

    writer.sync().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 24 + 3);
}

#[test]
fn oversized_key_is_rejected_on_write() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("0000000001.hint");

    let mut writer = Writer::create(&path).unwrap();
    let big_key = vec![b'k'; MAX_KEY_SIZE + 1];
    let err = writer.write(1, 2, 3, &big_key).unwrap_err();
    assert!(matches!(err, HintFileError::KeyTooLarge(_)));
}

#[test]
fn missing_file_fails_to_open() {
    let tmp = TempDir::new().unwrap();
    let err = Scanner::open(tmp.path().join("nope.hint")).unwrap_err();
    assert!(matches!(err, HintFileError::Io(_)));
}
