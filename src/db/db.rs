use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;

use crate::{
    column_family::{ColumnFamilyHandle, ColumnFamilyOptions, PrefixExtractor},
    compression::CompressionType,
    db::{
        DbCore, DbOptions, ReadOptions, WriteOptimizations, WriteOptions,
        db_impl::destroy_directory,
    },
    iterator::{DbIterator, ReadContext},
    transaction::{
        LockType, Snapshot, Transaction, TransactionBuilder, TransactionDbOptions,
        TransactionOptions, WriteBatch, WriteOp,
    },
    util::{Result, Status},
};

/// An open database.
///
/// Column families are addressed by their index in the resolved table:
/// `"0".."N-1"` at `0..N` and `"default"` at `N`. Indices stay stable when
/// a family is dropped.
///
/// Cloning is cheap; every clone, transaction, snapshot and iterator shares
/// the same engine. Once `close` is called (or the last reference is
/// dropped) every operation through any of them fails with `Closed`.
#[derive(Clone)]
pub struct Database {
    core: Arc<DbCore>,
}

impl Database {
    /// Open or create the database at `options.path`.
    ///
    /// Either everything is opened or nothing is retained.
    pub fn open(options: DbOptions, tx_options: TransactionDbOptions) -> Result<Database> {
        let core = DbCore::open(options, tx_options)?;
        Ok(Database { core })
    }

    pub fn builder(path: impl Into<PathBuf>) -> DbBuilder {
        DbBuilder::new(path)
    }

    pub(crate) fn core(&self) -> &Arc<DbCore> {
        &self.core
    }

    pub fn path(&self) -> &Path {
        self.core.path()
    }

    pub fn options(&self) -> &DbOptions {
        self.core.options()
    }

    // ---- schema ----

    /// Handle at `index`; `None` when out of range or dropped
    pub fn get_cf_handle(&self, index: usize) -> Option<ColumnFamilyHandle> {
        self.core.handles().get(index)
    }

    /// Index of `"default"`, always the last slot
    #[inline]
    pub fn default_index(&self) -> usize {
        self.core.handles().default_index()
    }

    /// Number of slots, dropped ones included
    pub fn column_family_count(&self) -> usize {
        self.core.handles().len()
    }

    pub fn column_family_name(&self, index: usize) -> Result<String> {
        Ok(self.core.handle(index)?.name().to_string())
    }

    pub fn column_family_options(&self, index: usize) -> Result<ColumnFamilyOptions> {
        Ok(self.core.handle(index)?.data().options().clone())
    }

    /// Drop the family at `index`. Its slot becomes a tombstone and no other
    /// index moves. The default family cannot be dropped.
    pub fn drop_column_family(&self, index: usize) -> Result<()> {
        self.core.drop_column_family(index)
    }

    // ---- ambient reads and writes ----

    pub fn get(&self, cf: usize, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.get_with(cf, key, &ReadOptions::default())
    }

    pub fn get_with(
        &self,
        cf: usize,
        key: impl AsRef<[u8]>,
        options: &ReadOptions,
    ) -> Result<Option<Bytes>> {
        let handle = self.core.handle(cf)?;
        self.core.get(&handle, key.as_ref(), None, options)
    }

    pub fn put(&self, cf: usize, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.put_with(cf, key, value, &WriteOptions::default())
    }

    pub fn put_with(
        &self,
        cf: usize,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        options: &WriteOptions,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(self.batch_index(cf)?, key, value);
        self.write_batch(batch, options, WriteOptimizations::default())
    }

    pub fn delete(&self, cf: usize, key: impl AsRef<[u8]>) -> Result<()> {
        self.delete_with(cf, key, &WriteOptions::default())
    }

    pub fn delete_with(&self, cf: usize, key: impl AsRef<[u8]>, options: &WriteOptions) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(self.batch_index(cf)?, key);
        self.write_batch(batch, options, WriteOptimizations::default())
    }

    /// Batch tag for family `cf`, rejecting indices with no live family
    pub(crate) fn batch_index(&self, cf: usize) -> Result<u32> {
        Ok(self.core.handle(cf)?.index() as u32)
    }

    /// Apply `batch` atomically. Its operations are tagged with column
    /// family indices.
    ///
    /// Unless `skip_concurrency_control` is set, every written key is locked
    /// for the duration of the write, so the batch waits for (or times out
    /// on) transactions holding those keys. Range deletions lock nothing and
    /// therefore require `skip_concurrency_control`.
    pub fn write_batch(
        &self,
        batch: WriteBatch,
        options: &WriteOptions,
        optimizations: WriteOptimizations,
    ) -> Result<()> {
        self.core.check_open()?;
        let batch = batch.remap_column_families(|index| Ok(self.core.handle(index as usize)?.id()))?;

        if optimizations.skip_concurrency_control {
            self.core.write(&batch, options)?;
            return Ok(());
        }
        if batch.has_range_deletions() {
            return Err(Status::invalid_argument(
                "Range deletions require skip_concurrency_control",
            ));
        }

        let keys = if optimizations.skip_duplicate_key_check {
            let mut keys: Vec<(u32, Bytes)> = batch
                .ops()
                .iter()
                .filter_map(|(cf, op)| match op {
                    WriteOp::Put { key, .. } | WriteOp::Delete { key } => Some((*cf, key.clone())),
                    WriteOp::DeleteRange { .. } => None,
                })
                .collect();
            keys.sort();
            keys
        } else {
            batch.locked_keys()
        };

        let locks = self.core.locks();
        let txn_id = self.core.new_transaction_id();
        let timeout = self.core.tx_options().default_lock_timeout;
        let mut acquired: Vec<&(u32, Bytes)> = Vec::with_capacity(keys.len());
        let result = (|| -> Result<()> {
            for entry in &keys {
                locks.acquire(entry.0, &entry.1, LockType::Write, txn_id, timeout, None)?;
                acquired.push(entry);
            }
            self.core.write(&batch, options)?;
            Ok(())
        })();
        for (cf, key) in acquired {
            locks.release(*cf, key, txn_id);
        }
        result
    }

    /// Sequence of the last committed write
    pub fn latest_sequence_number(&self) -> u64 {
        self.core.last_sequence()
    }

    // ---- snapshots ----

    pub fn acquire_snapshot(&self) -> Result<Snapshot> {
        self.core.check_open()?;
        Snapshot::acquire(&self.core)
    }

    /// Same as `snapshot.release()`
    pub fn release_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        snapshot.release()
    }

    // ---- transactions ----

    pub fn begin_transaction(
        &self,
        write_options: WriteOptions,
        options: TransactionOptions,
    ) -> Result<Transaction> {
        Transaction::begin(
            Arc::clone(&self.core),
            write_options,
            ReadOptions::default(),
            options,
        )
    }

    /// Configure a transaction before beginning it
    pub fn transaction(&self) -> TransactionBuilder {
        TransactionBuilder::new(Arc::clone(&self.core))
    }

    // ---- iteration ----

    /// Iterator over the latest committed state of family `cf`
    pub fn iterator(&self, cf: usize, options: ReadOptions) -> Result<DbIterator> {
        let handle = self.core.handle(cf)?;
        Ok(DbIterator::new(
            Arc::clone(&self.core),
            handle,
            ReadContext::Latest,
            options,
        ))
    }

    // ---- maintenance and teardown ----

    /// Write every memtable out to a table
    pub fn flush(&self) -> Result<()> {
        self.core.flush()
    }

    /// Flush and release the engine. Operations through any clone,
    /// transaction, snapshot or iterator fail with `Closed` afterwards.
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Close, then delete every file of the database
    pub fn destroy(self) -> Result<()> {
        self.core.destroy()
    }

    /// Delete a database that is not open. Fails with `Busy` if it is.
    pub fn destroy_path(path: impl AsRef<Path>) -> Result<()> {
        destroy_directory(path.as_ref())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.core.path())
            .field("column_families", &self.column_family_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Chained configuration of `DbOptions` and `TransactionDbOptions`
#[derive(Debug, Clone)]
pub struct DbBuilder {
    options: DbOptions,
    tx_options: TransactionDbOptions,
}

macro_rules! setters {
    ($($(#[$doc:meta])* $name:ident: $ty:ty),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(mut self, value: $ty) -> Self {
                self.options.$name = value;
                self
            }
        )*
    };
}

impl DbBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbBuilder {
            options: DbOptions {
                path: path.into(),
                ..DbOptions::default()
            },
            tx_options: TransactionDbOptions::default(),
        }
    }

    setters! {
        create_if_missing: bool,
        error_if_exists: bool,
        create_missing_column_families: bool,
        paranoid_checks: bool,
        prepare_for_bulk_load: bool,
        optimize_level_style_compaction: bool,
        /// Number of numbered families besides "default"
        column_families: usize,
        destroy_on_exit: bool,
        compression: CompressionType,
        bottommost_compression: CompressionType,
        block_size: usize,
        write_buffer_size: usize,
        use_bloom_filter: bool,
        bloom_filter_bits_per_key: usize,
        bloom_filter_whole_key_filtering: bool,
        enable_blob_files: bool,
        min_blob_size: usize,
        block_cache_capacity: usize,
        level0_file_num_compaction_trigger: usize,
        disable_auto_compactions: bool,
    }

    /// Load column family descriptors from an OPTIONS file
    pub fn options_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.options_path = Some(path.into());
        self
    }

    pub fn increase_parallelism(mut self, threads: usize) -> Self {
        self.options.increase_parallelism = Some(threads);
        self
    }

    pub fn prefix_extractor(mut self, extractor: PrefixExtractor) -> Self {
        self.options.prefix_extractor = Some(extractor);
        self
    }

    pub fn default_lock_timeout(mut self, timeout: Duration) -> Self {
        self.tx_options.default_lock_timeout = timeout;
        self
    }

    pub fn num_stripes(mut self, stripes: usize) -> Self {
        self.tx_options.num_stripes = stripes;
        self
    }

    pub fn max_num_locks(mut self, max: usize) -> Self {
        self.tx_options.max_num_locks = max;
        self
    }

    pub fn build(self) -> (DbOptions, TransactionDbOptions) {
        (self.options, self.tx_options)
    }

    pub fn open(self) -> Result<Database> {
        Database::open(self.options, self.tx_options)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn open(dir: &TempDir, column_families: usize) -> Database {
        Database::builder(dir.path().join("db"))
            .column_families(column_families)
            .default_lock_timeout(Duration::from_millis(50))
            .open()
            .unwrap()
    }

    #[test]
    fn test_handle_table() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, 3);
        assert_eq!(db.column_family_count(), 4);
        assert_eq!(db.default_index(), 3);
        assert_eq!(db.column_family_name(0).unwrap(), "0");
        assert_eq!(db.column_family_name(3).unwrap(), "default");
        assert!(db.get_cf_handle(4).is_none());

        db.drop_column_family(1).unwrap();
        assert!(db.get_cf_handle(1).is_none());
        assert!(db.get_cf_handle(2).is_some());
        assert!(db.put(1, "k", "v").unwrap_err().is_invalid_argument());
        assert!(db.drop_column_family(3).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_ambient_reads_and_writes() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, 1);
        db.put(0, "a", "1").unwrap();
        db.put(1, "a", "2").unwrap();
        assert_eq!(db.get(0, "a").unwrap(), Some(Bytes::from("1")));
        assert_eq!(db.get(1, "a").unwrap(), Some(Bytes::from("2")));

        db.delete(0, "a").unwrap();
        assert_eq!(db.get(0, "a").unwrap(), None);
        assert_eq!(db.get(1, "b").unwrap(), None);
        assert!(db.get(7, "a").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_out_of_range_index_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, 0);
        db.put(0, "k", "kept").unwrap();

        let wide = 1usize << 32;
        assert!(db.put(wide, "k", "v").unwrap_err().is_invalid_argument());
        assert!(db.delete(wide, "k").unwrap_err().is_invalid_argument());
        assert!(db.delete_range(wide, "a", "z").unwrap_err().is_invalid_argument());
        assert_eq!(db.get(0, "k").unwrap(), Some(Bytes::from("kept")));
    }

    #[test]
    fn test_write_batch_is_atomic() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, 1);
        let before = db.latest_sequence_number();

        let mut batch = WriteBatch::new();
        batch.put(0, "x", "1");
        batch.put(1, "y", "2");
        batch.delete(0, "z");
        db.write_batch(batch, &WriteOptions::default(), WriteOptimizations::default())
            .unwrap();
        assert_eq!(db.latest_sequence_number(), before + 3);
        assert_eq!(db.get(1, "y").unwrap(), Some(Bytes::from("2")));

        let mut bad = WriteBatch::new();
        bad.put(0, "x", "changed");
        bad.put(9, "y", "2");
        assert!(
            db.write_batch(bad, &WriteOptions::default(), WriteOptimizations::default())
                .unwrap_err()
                .is_invalid_argument()
        );
        assert_eq!(db.get(0, "x").unwrap(), Some(Bytes::from("1")));
    }

    #[test]
    fn test_range_deletion_needs_skip_concurrency_control() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, 0);
        let mut batch = WriteBatch::new();
        batch.delete_range(0, "a", "b");
        assert!(
            db.write_batch(batch, &WriteOptions::default(), WriteOptimizations::default())
                .unwrap_err()
                .is_invalid_argument()
        );
    }

    #[test]
    fn test_ambient_write_waits_for_transaction_lock() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, 0);
        let mut txn = db.transaction().begin().unwrap();
        txn.put(0, "k", "txn").unwrap();

        assert!(db.put(0, "k", "ambient").unwrap_err().is_busy());
        db.put(0, "other", "ambient").unwrap();

        txn.commit().unwrap();
        db.put(0, "k", "ambient").unwrap();
        assert_eq!(db.get(0, "k").unwrap(), Some(Bytes::from("ambient")));
    }

    #[test]
    fn test_closed_database() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, 0);
        let clone = db.clone();
        db.close().unwrap();
        assert!(clone.is_closed());
        assert!(clone.get(0, "a").unwrap_err().is_closed());
        assert!(clone.put(0, "a", "1").unwrap_err().is_closed());
        assert!(clone.acquire_snapshot().unwrap_err().is_closed());
        db.close().unwrap();
    }
}
