use std::{fs, path::Path};

use bytes::Bytes;
use stratakv::{CompressionType, Database, DbOptions, TransactionDbOptions, WriteOptions};
use tempfile::TempDir;

fn open(path: &Path, column_families: usize) -> Database {
    Database::builder(path)
        .column_families(column_families)
        .open()
        .unwrap()
}

/// Data in the memtable and in tables survives a clean reopen
#[test]
fn test_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");
    {
        let db = open(&db_path, 2);
        for i in 0..100 {
            db.put(i % 3, format!("key{i:04}"), format!("value{i:04}"))
                .unwrap();
        }
        db.flush().unwrap();
        db.put(0, "after_flush", "x").unwrap();
        db.delete(1, "key0001").unwrap();
    }
    {
        let db = open(&db_path, 2);
        for i in 0..100 {
            let key = format!("key{i:04}");
            let expected = if i == 1 {
                None
            } else {
                Some(Bytes::from(format!("value{i:04}")))
            };
            assert_eq!(db.get(i % 3, &key).unwrap(), expected, "{key}");
        }
        assert_eq!(db.get(0, "after_flush").unwrap(), Some(Bytes::from("x")));
    }
}

/// Writes acknowledged with the WAL survive a process that never closed
#[test]
fn test_wal_replay_without_close() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");
    let db = open(&db_path, 0);
    let sync = WriteOptions {
        sync: true,
        ..Default::default()
    };
    for i in 0..20 {
        db.put_with(0, format!("k{i}"), "v", &sync).unwrap();
    }
    let last = db.latest_sequence_number();
    // Simulate a crash: no flush, no unlock
    std::mem::forget(db);
    fs::remove_file(db_path.join(stratakv::db::LOCK_FILE)).unwrap();

    let db = open(&db_path, 0);
    assert_eq!(db.latest_sequence_number(), last);
    for i in 0..20 {
        assert_eq!(db.get(0, format!("k{i}")).unwrap(), Some(Bytes::from("v")));
    }
}

#[test]
fn test_family_count_changes() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");
    {
        let db = open(&db_path, 3);
        for cf in 0..4 {
            db.put(cf, "k", format!("cf{cf}")).unwrap();
        }
    }
    // Fewer families: "2" keeps its data on disk but gets no handle
    {
        let db = open(&db_path, 1);
        assert_eq!(db.column_family_count(), 2);
        assert_eq!(db.column_family_name(1).unwrap(), "default");
        assert_eq!(db.get(0, "k").unwrap(), Some(Bytes::from("cf0")));
        assert_eq!(db.get(1, "k").unwrap(), Some(Bytes::from("cf3")));
    }
    // More families again: "1" and "2" come back with their data, "3" is new
    {
        let db = open(&db_path, 4);
        assert_eq!(db.default_index(), 4);
        assert_eq!(db.get(1, "k").unwrap(), Some(Bytes::from("cf1")));
        assert_eq!(db.get(2, "k").unwrap(), Some(Bytes::from("cf2")));
        assert_eq!(db.get(3, "k").unwrap(), None);
        assert_eq!(db.get(4, "k").unwrap(), Some(Bytes::from("cf3")));
    }
}

#[test]
fn test_dropped_family_is_gone_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");
    {
        let db = open(&db_path, 2);
        db.put(1, "k", "v").unwrap();
        db.flush().unwrap();
        db.drop_column_family(1).unwrap();
        assert!(db.get_cf_handle(1).is_none());
    }
    {
        let db = open(&db_path, 2);
        assert!(db.get_cf_handle(1).is_some());
        assert_eq!(db.get(1, "k").unwrap(), None);
    }
}

#[test]
fn test_missing_families_not_created() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");
    let err = Database::builder(&db_path)
        .column_families(1)
        .create_missing_column_families(false)
        .open()
        .unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");

    // A failed open leaves the directory unlocked
    let db = Database::builder(&db_path)
        .create_missing_column_families(false)
        .open()
        .unwrap();
    assert_eq!(db.column_family_count(), 1);
}

#[test]
fn test_options_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");
    {
        let db = Database::builder(&db_path)
            .column_families(2)
            .compression(CompressionType::Snappy)
            .use_bloom_filter(true)
            .open()
            .unwrap();
        db.put(0, "k", "v").unwrap();
    }

    let options_file = temp_dir.path().join("saved_options");
    fs::copy(db_path.join(stratakv::db::OPTIONS_FILE), &options_file).unwrap();

    // The manifest remembers per-family options
    {
        let db = open(&db_path, 2);
        let options = db.column_family_options(0).unwrap();
        assert_eq!(options.compression, CompressionType::Snappy);
        assert_eq!(options.bloom_filter_bits_per_key, Some(10));
    }

    // Loading the options file also synthesizes new families from "default"
    {
        let db = Database::builder(&db_path)
            .column_families(3)
            .options_path(&options_file)
            .open()
            .unwrap();
        assert_eq!(db.column_family_count(), 4);
        assert_eq!(
            db.column_family_options(2).unwrap().compression,
            CompressionType::Snappy
        );
        assert_eq!(db.get(0, "k").unwrap(), Some(Bytes::from("v")));
    }

    let err = Database::builder(&db_path)
        .options_path(temp_dir.path().join("no_such_file"))
        .open()
        .unwrap_err();
    assert!(err.is_not_found(), "{err}");
}

#[test]
fn test_open_flags() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");

    let err = Database::builder(&db_path)
        .create_if_missing(false)
        .open()
        .unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");

    let db = open(&db_path, 0);
    let second = Database::open(
        DbOptions {
            path: db_path.clone(),
            ..Default::default()
        },
        TransactionDbOptions::default(),
    )
    .unwrap_err();
    assert!(second.is_busy(), "{second}");
    db.close().unwrap();

    let err = Database::builder(&db_path)
        .error_if_exists(true)
        .open()
        .unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");

    // Closing released the directory
    open(&db_path, 0);
}

#[test]
fn test_close_then_destroy() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");
    let db = open(&db_path, 0);
    db.put(0, "k", "v").unwrap();

    let err = Database::destroy_path(&db_path).unwrap_err();
    assert!(err.is_busy(), "{err}");
    assert!(db_path.exists());

    db.close().unwrap();
    assert!(db_path.exists(), "close alone must not delete");
    Database::destroy_path(&db_path).unwrap();
    assert!(!db_path.exists());
    Database::destroy_path(&db_path).unwrap();
}

#[test]
fn test_destroy() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");
    let db = open(&db_path, 1);
    let clone = db.clone();
    db.put(1, "k", "v").unwrap();

    db.destroy().unwrap();
    assert!(!db_path.exists());
    assert!(clone.get(1, "k").unwrap_err().is_closed());
    assert!(clone.get_cf_handle(0).is_none());
}

#[test]
fn test_destroy_on_exit() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recover_db");
    {
        let db = Database::builder(&db_path)
            .destroy_on_exit(true)
            .open()
            .unwrap();
        db.put(0, "k", "v").unwrap();
        let snapshot = db.acquire_snapshot().unwrap();
        drop(db);
        // A snapshot keeps the engine alive
        assert!(db_path.exists());
        assert_eq!(snapshot.get(0, "k").unwrap(), Some(Bytes::from("v")));
    }
    assert!(!db_path.exists());

    let db = Database::builder(&db_path)
        .destroy_on_exit(true)
        .open()
        .unwrap();
    db.close().unwrap();
    assert!(!db_path.exists());
}
