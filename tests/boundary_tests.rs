// Boundary condition tests for the table store
// These tests verify behavior at edge cases and limits

use tablestore::mergetree::MergeTreeWriter;
use tablestore::operation::ManifestCommittable;
use tablestore::types::{KeyValue, Row, RowKind, Value};
use tablestore::{Error, FileStore, Options};
use tempfile::TempDir;

fn int_row(v: i64) -> Row {
    Row::new(vec![Value::Int(v)])
}

fn commit(store: &FileStore, identifier: u64, writer: &mut MergeTreeWriter) -> Vec<u64> {
    let mut committable = ManifestCommittable::new(identifier);
    committable.add_increment("", 0, writer.prepare_commit(true).unwrap());
    store.new_commit("boundary").commit(&committable).unwrap()
}

fn read_all(store: &FileStore) -> Vec<KeyValue> {
    let plan = store.new_scan().plan().unwrap();
    let files: Vec<_> = plan.files.into_iter().map(|e| e.file).collect();
    store.new_read().read("", 0, &files).unwrap()
}

/// Committing nothing creates no snapshot
#[test]
fn test_empty_commit() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path(), Options::default()).unwrap();

    let mut writer = store.new_writer("", 0).unwrap();
    assert!(commit(&store, 1, &mut writer).is_empty());
    assert!(store.latest_snapshot().unwrap().is_none());
    assert!(store.new_commit("boundary").commit(&ManifestCommittable::new(2)).unwrap().is_empty());
}

/// Flushing an empty memtable writes nothing
#[test]
fn test_flush_empty_memtable() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path(), Options::default()).unwrap();

    let mut writer = store.new_writer("", 0).unwrap();
    writer.flush().unwrap();
    writer.flush().unwrap();
    assert!(writer.levels().all_files().is_empty());
    assert!(writer.prepare_commit(true).unwrap().is_empty());
}

/// A value far larger than a block and the target file size
#[test]
fn test_large_value() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().block_size(4 * 1024).target_file_size(64 * 1024);
    let store = FileStore::open(dir.path(), options).unwrap();

    let large = vec![0xABu8; 1024 * 1024];
    let mut writer = store.new_writer("", 0).unwrap();
    writer.write(RowKind::Insert, b"large", Row::new(vec![Value::Bytes(large.clone())])).unwrap();
    writer.write(RowKind::Insert, b"small", int_row(1)).unwrap();
    commit(&store, 1, &mut writer);

    let rows = read_all(&store);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value, Row::new(vec![Value::Bytes(large)]));
}

/// Tiny files: one flush rolls over into many files
#[test]
fn test_small_target_file_size() {
    let dir = TempDir::new().unwrap();
    let options = Options::default()
        .block_size(256)
        .target_file_size(1024)
        .level0_compaction_trigger(1000);
    let store = FileStore::open(dir.path(), options).unwrap();

    let mut writer = store.new_writer("", 0).unwrap();
    for i in 0..500 {
        writer.write(RowKind::Insert, format!("key{:04}", i).as_bytes(), int_row(i)).unwrap();
    }
    commit(&store, 1, &mut writer);

    let plan = store.new_scan().plan().unwrap();
    assert!(plan.files.len() > 1);
    let total: u64 = plan.files.iter().map(|e| e.file.row_count).sum();
    assert_eq!(total, 500);
    assert_eq!(read_all(&store).len(), 500);
}

/// Binary keys sort bytewise
#[test]
fn test_binary_keys() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path(), Options::default()).unwrap();

    let keys: Vec<Vec<u8>> =
        vec![vec![0xFF, 0x00], vec![0x00], vec![0x00, 0x00], vec![0x7F, 0xFF, 0xFF]];
    let mut writer = store.new_writer("", 0).unwrap();
    for (i, key) in keys.iter().enumerate() {
        writer.write(RowKind::Insert, key, int_row(i as i64)).unwrap();
    }
    commit(&store, 1, &mut writer);

    let mut expected = keys.clone();
    expected.sort();
    let actual: Vec<Vec<u8>> = read_all(&store).into_iter().map(|kv| kv.key).collect();
    assert_eq!(actual, expected);
}

/// Keys written in descending order come back ascending
#[test]
fn test_reverse_sequential_keys() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().write_buffer_size(1024);
    let store = FileStore::open(dir.path(), options).unwrap();

    let mut writer = store.new_writer("", 0).unwrap();
    for i in (0..300).rev() {
        writer.write(RowKind::Insert, format!("key{:04}", i).as_bytes(), int_row(i)).unwrap();
    }
    commit(&store, 1, &mut writer);

    let rows = read_all(&store);
    assert_eq!(rows.len(), 300);
    assert!(rows.windows(2).all(|w| w[0].key < w[1].key));
}

/// Alternating insert and delete of one key across flushes
#[test]
fn test_alternating_insert_delete() {
    let dir = TempDir::new().unwrap();
    let options = Options::default().level0_compaction_trigger(2);
    let store = FileStore::open(dir.path(), options).unwrap();

    let mut writer = store.new_writer("", 0).unwrap();
    for i in 0..9 {
        if i % 2 == 0 {
            writer.write(RowKind::Insert, b"flip", int_row(i)).unwrap();
        } else {
            writer.write(RowKind::Delete, b"flip", Row::default()).unwrap();
        }
        writer.flush().unwrap();
    }
    commit(&store, 1, &mut writer);

    let rows = read_all(&store);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, int_row(8));

    writer.write(RowKind::Delete, b"flip", Row::default()).unwrap();
    commit(&store, 2, &mut writer);
    assert!(read_all(&store).is_empty());
}

/// Deleting a key that never existed is harmless
#[test]
fn test_delete_missing_key() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path(), Options::default()).unwrap();

    let mut writer = store.new_writer("", 0).unwrap();
    writer.write(RowKind::Delete, b"ghost", Row::default()).unwrap();
    commit(&store, 1, &mut writer);
    assert!(read_all(&store).is_empty());
}

/// A closed writer refuses further work
#[test]
fn test_closed_writer() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path(), Options::default()).unwrap();

    let mut writer = store.new_writer("", 0).unwrap();
    writer.close().unwrap();
    writer.close().unwrap();
    assert!(matches!(writer.write(RowKind::Insert, b"k", int_row(1)), Err(Error::InvalidState(_))));
    assert!(matches!(writer.prepare_commit(true), Err(Error::InvalidState(_))));
}

/// Null columns survive the file format
#[test]
fn test_mixed_value_types() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path(), Options::default()).unwrap();

    let row = Row::new(vec![
        Value::Null,
        Value::Bool(true),
        Value::Int(i64::MIN),
        Value::Double(-0.5),
        Value::String(String::new()),
        Value::Bytes(Vec::new()),
    ]);
    let mut writer = store.new_writer("", 0).unwrap();
    writer.write(RowKind::Insert, b"k", row.clone()).unwrap();
    commit(&store, 1, &mut writer);
    assert_eq!(read_all(&store)[0].value, row);
}
