use std::{
    collections::{BTreeMap, HashSet},
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::{
    column_family::{
        ColumnFamilyData, ColumnFamilyDescriptor, ColumnFamilyHandle, ColumnFamilyOptions,
        ColumnFamilySet, DEFAULT_COLUMN_FAMILY_NAME, resolve_column_families,
    },
    compaction::{CompactionEntry, collect_garbage, merge_runs},
    compression::CompressionType,
    db::{
        DbOptions, ReadOptions, WriteOptions,
        options_file::OptionsFile,
    },
    import_export::IngestExternalFileOptions,
    iterator::{InternalIterator, TableIterator, UserIterator, UserIteratorOptions},
    memtable::{InternalKey, MemTable, RangeTombstone, ValueKind},
    table::{BlockCache, BlockReadSettings, TableBuilder, TableReader, table_file_name},
    transaction::{LockManager, TransactionDbOptions, WriteBatch, WriteOp},
    util::{Result, Status},
    version::{FileRecord, Manifest, TableFile, Version},
    wal::{self, log_file_name},
};

pub const LOCK_FILE: &str = "LOCK";

/// State serialized by the write lock
pub(crate) struct WriteState {
    log: Option<wal::Writer>,
    /// Logs numbered below this are fully flushed
    log_number: u64,
}

/// The storage engine behind a `Database` handle.
///
/// One write lock orders every mutation: WAL appends, memtable inserts,
/// flushes, version installs and manifest writes. Reads never take it;
/// they pin the current `Version` of a family and a sequence number.
pub(crate) struct DbCore {
    path: PathBuf,
    options: DbOptions,
    tx_options: TransactionDbOptions,
    write: Mutex<WriteState>,
    last_sequence: AtomicU64,
    next_file_number: AtomicU64,
    next_family_id: AtomicU32,
    /// Every family in the manifest, by id, including ones without a handle
    families: RwLock<BTreeMap<u32, Arc<ColumnFamilyData>>>,
    handles: ColumnFamilySet,
    block_cache: Arc<BlockCache>,
    /// Live snapshot sequences and their reference counts
    snapshots: Mutex<BTreeMap<u64, usize>>,
    locks: LockManager,
    pool: rayon::ThreadPool,
    compaction: Mutex<()>,
    /// Set once open finished; a failed open never flushes or destroys
    opened: AtomicBool,
    closed: AtomicBool,
    destroyed: AtomicBool,
    file_lock: Mutex<Option<File>>,
    next_txn_id: AtomicU64,
}

impl DbCore {
    pub fn open(options: DbOptions, tx_options: TransactionDbOptions) -> Result<Arc<DbCore>> {
        let path = options.path.clone();
        if path.as_os_str().is_empty() {
            return Err(Status::invalid_argument("Database path is empty"));
        }
        if !path.exists() {
            if !options.create_if_missing {
                return Err(Status::invalid_argument(format!(
                    "{} does not exist and create_if_missing is false",
                    path.display()
                )));
            }
            fs::create_dir_all(&path)
                .map_err(|e| Status::io_error(format!("Failed to create directory: {e}")))?;
        }

        let file_lock = lock_directory(&path)?;

        let loaded = Manifest::load(&path)?;
        if options.error_if_exists && loaded.is_some() {
            return Err(Status::invalid_argument(format!(
                "Database at {} already exists",
                path.display()
            )));
        }
        let manifest = loaded.unwrap_or_default();

        let template = options.column_family_options();
        let existing: Vec<ColumnFamilyDescriptor> = match &options.options_path {
            Some(options_path) => OptionsFile::load(options_path)?.column_families,
            None => manifest
                .families
                .iter()
                .map(|f| ColumnFamilyDescriptor::new(f.name.clone(), f.options.clone()))
                .collect(),
        };
        let resolved = resolve_column_families(&existing, options.column_families, &template);

        let block_cache = Arc::new(BlockCache::new(options.block_cache_capacity));
        let mut families: BTreeMap<u32, Arc<ColumnFamilyData>> = BTreeMap::new();
        for record in &manifest.families {
            let cf_options = resolved
                .iter()
                .find(|d| d.name == record.name)
                .map_or_else(|| record.options.clone(), |d| d.options.clone());
            let files = record
                .files
                .iter()
                .map(|f| open_table(&path, f, &block_cache, options.paranoid_checks))
                .collect::<Result<Vec<_>>>()?;
            let version = Version::new(Arc::new(MemTable::new()), files);
            families.insert(
                record.id,
                Arc::new(ColumnFamilyData::new(record.id, record.name.clone(), cf_options, version)),
            );
        }

        let mut next_family_id = manifest.next_family_id;
        let mut slots = Vec::with_capacity(resolved.len());
        for descriptor in &resolved {
            let found = families.values().find(|cf| cf.name() == descriptor.name).cloned();
            let data = match found {
                Some(data) => data,
                None => {
                    if !options.create_missing_column_families
                        && descriptor.name != DEFAULT_COLUMN_FAMILY_NAME
                    {
                        return Err(Status::invalid_argument(format!(
                            "Column family \"{}\" does not exist",
                            descriptor.name
                        )));
                    }
                    let id = next_family_id;
                    next_family_id += 1;
                    let data = Arc::new(ColumnFamilyData::new(
                        id,
                        descriptor.name.clone(),
                        descriptor.options.clone(),
                        Version::empty(),
                    ));
                    families.insert(id, Arc::clone(&data));
                    data
                },
            };
            slots.push(ColumnFamilyHandle::new(slots.len(), data));
        }

        let mut next_file_number = manifest.next_file_number;
        for number in numbered_files(&path)?.into_iter().map(|(n, _)| n) {
            next_file_number = next_file_number.max(number + 1);
        }

        let mut last_sequence = manifest.last_sequence;
        for log in log_numbers(&path)? {
            if log < manifest.log_number {
                continue;
            }
            replay_log(&path.join(log_file_name(log)), &families, &mut last_sequence, options.paranoid_checks)?;
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.increase_parallelism.unwrap_or(0))
            .thread_name(|i| format!("stratakv-compaction-{i}"))
            .build()
            .map_err(|e| Status::invalid_argument(format!("Failed to build thread pool: {e}")))?;

        let locks = LockManager::new(tx_options.num_stripes, tx_options.max_num_locks);
        let core = Arc::new(DbCore {
            path,
            options,
            tx_options,
            write: Mutex::new(WriteState {
                log: None,
                log_number: manifest.log_number,
            }),
            last_sequence: AtomicU64::new(last_sequence),
            next_file_number: AtomicU64::new(next_file_number),
            next_family_id: AtomicU32::new(next_family_id),
            families: RwLock::new(families),
            handles: ColumnFamilySet::new(slots),
            block_cache,
            snapshots: Mutex::new(BTreeMap::new()),
            locks,
            pool,
            compaction: Mutex::new(()),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            file_lock: Mutex::new(Some(file_lock)),
            next_txn_id: AtomicU64::new(1),
        });

        if let Err(e) = core.finish_open(&resolved) {
            core.abandon();
            return Err(e);
        }
        core.opened.store(true, Ordering::Release);

        info!(
            path = %core.path.display(),
            families = core.handles.len(),
            last_sequence = core.last_sequence(),
            "database opened"
        );
        Ok(core)
    }

    /// Persist recovered state and start a fresh log
    fn finish_open(&self, resolved: &[ColumnFamilyDescriptor]) -> Result<()> {
        {
            let mut state = self.write.lock();
            self.flush_locked(&mut state, true)?;
        }
        OptionsFile::new(resolved.to_vec()).store(&self.path)?;
        self.delete_orphans();
        Ok(())
    }

    /// Give up on a partially opened core without touching disk
    fn abandon(&self) {
        self.closed.store(true, Ordering::Release);
        self.write.lock().log = None;
        self.release_file_lock();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &DbOptions {
        &self.options
    }

    pub fn tx_options(&self) -> &TransactionDbOptions {
        &self.tx_options
    }

    pub fn handles(&self) -> &ColumnFamilySet {
        &self.handles
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    #[inline]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    pub fn new_transaction_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Status::closed("Database is closed"));
        }
        Ok(())
    }

    /// Live handle at `index`
    pub fn handle(&self, index: usize) -> Result<ColumnFamilyHandle> {
        self.check_open()?;
        self.handles.require(index)
    }

    fn check_handle(&self, handle: &ColumnFamilyHandle) -> Result<()> {
        self.check_open()?;
        if handle.is_dropped() {
            return Err(Status::invalid_argument(format!(
                "Column family \"{}\" has been dropped",
                handle.name()
            )));
        }
        Ok(())
    }

    // ---- reads ----

    /// Point lookup as of `sequence`, or the latest committed state
    pub fn get(
        &self,
        handle: &ColumnFamilyHandle,
        key: &[u8],
        sequence: Option<u64>,
        options: &ReadOptions,
    ) -> Result<Option<Bytes>> {
        self.check_handle(handle)?;
        let version = handle.data().current();
        let sequence = sequence.unwrap_or_else(|| self.last_sequence());
        version.get(key, sequence, options.block_settings())
    }

    /// Highest sequence that wrote `key`, for conflict validation
    pub fn latest_sequence(&self, handle: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<u64>> {
        self.check_handle(handle)?;
        handle.data().current().latest_sequence(key)
    }

    pub fn user_iterator(
        &self,
        handle: &ColumnFamilyHandle,
        sequence: Option<u64>,
        options: &ReadOptions,
    ) -> Result<UserIterator> {
        self.check_handle(handle)?;
        let version = handle.data().current();
        let sequence = sequence.unwrap_or_else(|| self.last_sequence());
        let cf_options = handle.data().options();
        let iter_options = UserIteratorOptions {
            lower_bound: options.lower_bound.clone(),
            upper_bound: options.upper_bound.clone(),
            prefix_extractor: cf_options.prefix_extractor,
            prefix_same_as_start: options.prefix_same_as_start,
            total_order_seek: options.total_order_seek,
            auto_prefix_mode: options.auto_prefix_mode,
            pin_data: options.pin_data,
            settings: options.block_settings(),
        };
        Ok(UserIterator::new(version, sequence, iter_options))
    }

    // ---- snapshots ----

    pub fn register_snapshot(&self) -> Result<u64> {
        self.check_open()?;
        let mut snapshots = self.snapshots.lock();
        let sequence = self.last_sequence();
        *snapshots.entry(sequence).or_default() += 1;
        Ok(sequence)
    }

    pub fn unregister_snapshot(&self, sequence: u64) {
        let mut snapshots = self.snapshots.lock();
        if let Some(count) = snapshots.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                snapshots.remove(&sequence);
            }
        }
    }

    /// Ascending sequences of live snapshots
    pub fn snapshot_sequences(&self) -> Vec<u64> {
        self.snapshots.lock().keys().copied().collect()
    }

    // ---- writes ----

    /// Apply `batch` (tagged with family ids) atomically; returns the last
    /// sequence it was assigned.
    pub fn write(&self, batch: &WriteBatch, options: &WriteOptions) -> Result<u64> {
        if batch.is_empty() {
            self.check_open()?;
            return Ok(self.last_sequence());
        }
        for (_, op) in batch.ops() {
            if let WriteOp::DeleteRange { start, end } = op
                && start >= end
            {
                return Err(Status::invalid_argument("Range deletion start must precede end"));
            }
        }

        let mut flushed = false;
        let last = {
            let mut state = self.write.lock();
            self.check_open()?;

            let targets = {
                let families = self.families.read();
                batch
                    .ops()
                    .iter()
                    .map(|(cf, _)| {
                        families.get(cf).cloned().ok_or_else(|| {
                            Status::invalid_argument(format!("Unknown column family id {cf}"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            };

            if self.memtable_full() {
                if options.no_slowdown {
                    return Err(Status::incomplete("Write would stall on a full memtable"));
                }
                self.flush_locked(&mut state, false)?;
                flushed = true;
            }

            let base = self.last_sequence() + 1;
            if !options.disable_wal {
                let record = batch.encode(base);
                match state.log.as_mut() {
                    Some(log) => log.add_record(&record, options.sync)?,
                    None => return Err(Status::closed("Write-ahead log is closed")),
                }
            }

            for (i, ((_, op), cf)) in batch.ops().iter().zip(&targets).enumerate() {
                apply_op(&cf.current().mem, base + i as u64, op);
            }
            let last = base + batch.count() as u64 - 1;
            self.last_sequence.store(last, Ordering::Release);
            last
        };

        if flushed {
            self.maybe_compact();
        }
        Ok(last)
    }

    fn memtable_full(&self) -> bool {
        self.families.read().values().any(|cf| {
            cf.current().mem.approximate_memory_usage() >= cf.options().write_buffer_size
        })
    }

    // ---- flush ----

    pub fn flush(&self) -> Result<()> {
        {
            let mut state = self.write.lock();
            self.check_open()?;
            self.flush_locked(&mut state, false)?;
        }
        self.maybe_compact();
        Ok(())
    }

    /// Turn every non-empty memtable into a table and rotate the log.
    ///
    /// With `rotate_log` a new log is started even when nothing was
    /// flushed.
    fn flush_locked(&self, state: &mut WriteState, rotate_log: bool) -> Result<()> {
        let families: Vec<Arc<ColumnFamilyData>> = self.families.read().values().cloned().collect();

        let mut built = Vec::new();
        for cf in &families {
            let mem = Arc::clone(&cf.current().mem);
            if mem.is_empty() {
                continue;
            }
            let number = self.new_file_number();
            let file = self.build_table(
                cf.options(),
                number,
                mem.entries(),
                mem.range_tombstones(),
                cf.options().compression,
            )?;
            debug!(cf = cf.name(), file = number, entries = mem.len(), "memtable flushed");
            built.push((Arc::clone(cf), file));
        }
        if built.is_empty() && !rotate_log {
            return Ok(());
        }

        let log_number = self.new_file_number();
        let writer = wal::Writer::create(self.path.join(log_file_name(log_number)))?;

        for (cf, file) in built {
            cf.update(|v| {
                let mut files = v.files.clone();
                files.push(file);
                Version::new(Arc::new(MemTable::new()), files)
            });
        }
        state.log = Some(writer);
        let previous = state.log_number;
        state.log_number = log_number;
        self.persist_manifest(state)?;

        for log in log_numbers(&self.path)? {
            if log < log_number
                && let Err(e) = fs::remove_file(self.path.join(log_file_name(log)))
            {
                warn!(log, error = %e, "failed to delete flushed log");
            }
        }
        debug!(previous, log_number, "log rotated");
        Ok(())
    }

    fn build_table<I>(
        &self,
        options: &ColumnFamilyOptions,
        number: u64,
        entries: I,
        tombstones: Vec<RangeTombstone>,
        compression: CompressionType,
    ) -> Result<Arc<TableFile>>
    where
        I: IntoIterator<Item = CompactionEntry>,
    {
        let path = self.path.join(table_file_name(number));
        let result = (|| -> Result<TableFile> {
            let mut builder = TableBuilder::new(&path, options, compression)?;
            for (key, value) in entries {
                builder.add(&key, &value)?;
            }
            for tombstone in tombstones {
                builder.add_range_tombstone(tombstone)?;
            }
            builder.finish()?;
            TableFile::open(&self.path, number, None, Some(Arc::clone(&self.block_cache)))
        })();
        match result {
            Ok(file) => Ok(Arc::new(file)),
            Err(e) => {
                let _ = fs::remove_file(&path);
                let _ = fs::remove_file(TableBuilder::blob_path(&path));
                Err(e)
            },
        }
    }

    fn persist_manifest(&self, state: &WriteState) -> Result<()> {
        let families = self.families.read();
        let manifest = Manifest {
            next_file_number: self.next_file_number.load(Ordering::Acquire),
            last_sequence: self.last_sequence(),
            log_number: state.log_number,
            next_family_id: self.next_family_id.load(Ordering::Acquire),
            families: families.values().map(|cf| cf.record()).collect(),
        };
        manifest.store(&self.path)
    }

    // ---- compaction ----

    /// Flush, then compact every table overlapping `[start, end]`
    pub fn compact_range(
        &self,
        handle: &ColumnFamilyHandle,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.check_handle(handle)?;
        {
            let mut state = self.write.lock();
            self.check_open()?;
            self.flush_locked(&mut state, false)?;
        }
        self.run_compaction(handle.data(), start, end)
    }

    /// Compact families that reached their file count trigger
    fn maybe_compact(&self) {
        let families: Vec<Arc<ColumnFamilyData>> = self.families.read().values().cloned().collect();
        for cf in families {
            let options = cf.options();
            if options.disable_auto_compactions
                || options.level0_file_num_compaction_trigger == 0
                || cf.current().num_files() < options.level0_file_num_compaction_trigger
            {
                continue;
            }
            if let Err(e) = self.run_compaction(&cf, None, None) {
                warn!(cf = cf.name(), error = %e, "automatic compaction failed");
            }
        }
    }

    fn run_compaction(
        &self,
        cf: &Arc<ColumnFamilyData>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        let _guard = self.compaction.lock();
        if cf.is_dropped() {
            return Ok(());
        }
        let version = cf.current();
        let inputs = select_inputs(&version.files, start, end);
        if inputs.is_empty() {
            return Ok(());
        }

        let settings = BlockReadSettings {
            verify_checksums: true,
            fill_cache: false,
        };
        let runs = self.pool.install(|| {
            inputs
                .par_iter()
                .map(|file| read_table(file, settings))
                .collect::<Result<Vec<_>>>()
        })?;
        let tombstones: Vec<RangeTombstone> = inputs
            .iter()
            .flat_map(|f| f.reader().range_tombstones().iter().cloned())
            .collect();
        let input_entries: usize = runs.iter().map(Vec::len).sum();

        let output = collect_garbage(merge_runs(runs), tombstones, &self.snapshot_sequences());
        let output_entries = output.entries.len();
        let output_file = if output.is_empty() {
            None
        } else {
            let number = self.new_file_number();
            Some(self.build_table(
                cf.options(),
                number,
                output.entries,
                output.range_tombstones,
                cf.options().bottommost_compression,
            )?)
        };

        let state = self.write.lock();
        if self.is_closed() || cf.is_dropped() {
            if let Some(file) = &output_file {
                file.mark_obsolete();
            }
            return Ok(());
        }

        let input_numbers: HashSet<u64> = inputs.iter().map(|f| f.number()).collect();
        let previous = cf.current();
        cf.update(|v| {
            let mut files: Vec<Arc<TableFile>> = v
                .files
                .iter()
                .filter(|f| !input_numbers.contains(&f.number()))
                .cloned()
                .collect();
            files.extend(output_file.iter().cloned());
            v.with_files(files)
        });
        if let Err(e) = self.persist_manifest(&state) {
            cf.update(|v| v.with_files(previous.files.clone()));
            if let Some(file) = &output_file {
                file.mark_obsolete();
            }
            return Err(e);
        }
        for file in &inputs {
            file.mark_obsolete();
        }

        debug!(
            cf = cf.name(),
            inputs = inputs.len(),
            input_entries,
            output_entries,
            output = output_file.as_ref().map(|f| f.number()),
            "compaction finished"
        );
        Ok(())
    }

    // ---- ingestion ----

    pub fn ingest(
        &self,
        handle: &ColumnFamilyHandle,
        paths: &[PathBuf],
        options: &IngestExternalFileOptions,
    ) -> Result<()> {
        self.check_handle(handle)?;
        if paths.is_empty() {
            return Ok(());
        }
        for path in paths {
            let reader = TableReader::open(path, 0, None, None)?;
            if reader.properties().is_empty() {
                return Err(Status::invalid_argument(format!(
                    "External file {} is empty",
                    path.display()
                )));
            }
            if options.verify_checksums_before_ingest {
                reader.verify_checksums()?;
            }
        }

        let mut state = self.write.lock();
        self.check_handle(handle)?;
        // Memtable data must stay newer than any table
        if !handle.data().current().mem.is_empty() {
            self.flush_locked(&mut state, false)?;
        }

        let mut added: Vec<Arc<TableFile>> = Vec::with_capacity(paths.len());
        let result = (|| -> Result<()> {
            for source in paths {
                let number = self.new_file_number();
                let target = self.path.join(table_file_name(number));
                transfer(source, &target, options.move_files)?;
                let blob = TableBuilder::blob_path(source);
                if blob.exists() {
                    transfer(&blob, &TableBuilder::blob_path(&target), options.move_files)?;
                }
                let sequence = self.last_sequence() + 1;
                let file = TableFile::open(
                    &self.path,
                    number,
                    Some(sequence),
                    Some(Arc::clone(&self.block_cache)),
                )?;
                self.last_sequence.store(sequence, Ordering::Release);
                added.push(Arc::new(file));
            }
            Ok(())
        })();
        if let Err(e) = result {
            for file in &added {
                file.mark_obsolete();
            }
            return Err(e);
        }

        let previous = handle.data().current();
        handle.data().update(|v| {
            let mut files = v.files.clone();
            files.extend(added.iter().cloned());
            v.with_files(files)
        });
        if let Err(e) = self.persist_manifest(&state) {
            handle.data().update(|v| v.with_files(previous.files.clone()));
            for file in &added {
                file.mark_obsolete();
            }
            return Err(e);
        }
        drop(state);

        debug!(cf = handle.name(), files = added.len(), "external files ingested");
        self.maybe_compact();
        Ok(())
    }

    // ---- schema ----

    pub fn drop_column_family(&self, index: usize) -> Result<()> {
        if index == self.handles.default_index() {
            return Err(Status::invalid_argument("Cannot drop the default column family"));
        }
        let state = self.write.lock();
        let handle = self.handle(index)?;
        let id = handle.id();

        let removed = self.families.write().remove(&id);
        if let Err(e) = self.persist_manifest(&state) {
            if let Some(cf) = removed {
                self.families.write().insert(id, cf);
            }
            return Err(e);
        }
        handle.data().mark_dropped();
        self.handles.tombstone(index);
        drop(state);

        info!(cf = handle.name(), index, "column family dropped");
        Ok(())
    }

    // ---- teardown ----

    /// Flush and release the directory, deleting it under `destroy_on_exit`.
    /// Later operations fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut state = self.write.lock();
        if self.is_closed() {
            return Ok(());
        }
        let flushed = self.flush_locked(&mut state, false);
        self.closed.store(true, Ordering::Release);
        state.log = None;
        drop(state);
        self.release_file_lock();

        match &flushed {
            Ok(()) => info!(path = %self.path.display(), "database closed"),
            Err(e) => error!(path = %self.path.display(), error = %e, "flush on close failed"),
        }
        if self.options.destroy_on_exit
            && let Err(e) = self.remove_directory()
        {
            error!(path = %self.path.display(), error = %e, "destroy on exit failed");
        }
        flushed
    }

    /// Close, then delete the whole directory
    pub fn destroy(&self) -> Result<()> {
        self.close()?;
        self.remove_directory()
    }

    fn remove_directory(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.families.write().clear();
        self.handles.clear();
        fs::remove_dir_all(&self.path)?;
        info!(path = %self.path.display(), "database destroyed");
        Ok(())
    }

    fn release_file_lock(&self) {
        if let Some(file) = self.file_lock.lock().take()
            && let Err(e) = FileExt::unlock(&file)
        {
            warn!(path = %self.path.display(), error = %e, "failed to unlock database directory");
        }
    }

    /// Remove tables and blobs the manifest does not reference
    fn delete_orphans(&self) {
        let live: HashSet<u64> = self
            .families
            .read()
            .values()
            .flat_map(|cf| cf.current().files.iter().map(|f| f.number()).collect::<Vec<_>>())
            .collect();
        let entries = match numbered_files(&self.path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to list database directory");
                return;
            },
        };
        for (number, name) in entries {
            if (name.ends_with(".sst") || name.ends_with(".blob")) && !live.contains(&number) {
                match fs::remove_file(self.path.join(&name)) {
                    Ok(()) => debug!(file = %name, "orphan file deleted"),
                    Err(e) => warn!(file = %name, error = %e, "failed to delete orphan file"),
                }
            }
        }
    }
}

impl Drop for DbCore {
    fn drop(&mut self) {
        if !self.opened.load(Ordering::Acquire) {
            return;
        }
        if !self.is_closed()
            && let Err(e) = self.close()
        {
            error!(path = %self.path.display(), error = %e, "close on drop failed");
        }
    }
}

/// Remove a database directory that no process has open
pub(crate) fn destroy_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let lock = lock_directory(path)?;
    drop(lock);
    fs::remove_dir_all(path)?;
    info!(path = %path.display(), "database destroyed");
    Ok(())
}

fn lock_directory(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path.join(LOCK_FILE))?;
    file.try_lock_exclusive().map_err(|e| {
        Status::busy(format!("Database at {} is in use: {e}", path.display()))
    })?;
    Ok(file)
}

fn open_table(
    dir: &Path,
    record: &FileRecord,
    cache: &Arc<BlockCache>,
    paranoid: bool,
) -> Result<Arc<TableFile>> {
    let file = TableFile::open(dir, record.number, record.global_seqno, Some(Arc::clone(cache)))?;
    if paranoid {
        file.reader().verify_checksums()?;
    }
    Ok(Arc::new(file))
}

/// `(number, file name)` of every `NNNNNN.ext` file in `dir`
fn numbered_files(dir: &Path) -> Result<Vec<(u64, String)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if let Some((stem, _)) = name.split_once('.')
            && let Ok(number) = stem.parse::<u64>()
        {
            found.push((number, name));
        }
    }
    Ok(found)
}

fn log_numbers(dir: &Path) -> Result<Vec<u64>> {
    let mut logs: Vec<u64> = numbered_files(dir)?
        .into_iter()
        .filter(|(_, name)| name.ends_with(".log"))
        .map(|(number, _)| number)
        .collect();
    logs.sort_unstable();
    Ok(logs)
}

fn replay_log(
    path: &Path,
    families: &BTreeMap<u32, Arc<ColumnFamilyData>>,
    last_sequence: &mut u64,
    paranoid: bool,
) -> Result<()> {
    let mut reader = wal::Reader::open(path)?;
    let mut records = 0usize;
    loop {
        let decoded = reader
            .read_record()
            .and_then(|r| r.map(|data| WriteBatch::decode(&data)).transpose());
        match decoded {
            Ok(Some((base, batch))) => {
                for (i, (cf, op)) in batch.ops().iter().enumerate() {
                    // Families dropped after the write are skipped
                    if let Some(cf) = families.get(cf) {
                        apply_op(&cf.current().mem, base + i as u64, op);
                    }
                }
                if !batch.is_empty() {
                    *last_sequence = (*last_sequence).max(base + batch.count() as u64 - 1);
                }
                records += 1;
            },
            Ok(None) => break,
            Err(e) if e.is_corruption() && !paranoid => {
                warn!(
                    log = %path.display(),
                    offset = reader.offset(),
                    error = %e,
                    "dropping damaged log tail"
                );
                break;
            },
            Err(e) => return Err(e),
        }
    }
    debug!(log = %path.display(), records, "log replayed");
    Ok(())
}

fn apply_op(mem: &MemTable, sequence: u64, op: &WriteOp) {
    match op {
        WriteOp::Put { key, value } => mem.add(sequence, ValueKind::Value, key, value),
        WriteOp::Delete { key } => mem.add(sequence, ValueKind::Deletion, key, b""),
        WriteOp::DeleteRange { start, end } => mem.delete_range(sequence, start, end),
    }
}

/// Files overlapping `[start, end]`, widened until no other file overlaps
/// the selection's key range
fn select_inputs(
    files: &[Arc<TableFile>],
    start: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Vec<Arc<TableFile>> {
    let mut selected: Vec<bool> = files.iter().map(|f| f.overlaps(start, end)).collect();
    loop {
        let mut range: Option<(&[u8], &[u8])> = None;
        for (file, _) in files.iter().zip(&selected).filter(|(_, s)| **s) {
            range = Some(match range {
                None => (file.smallest(), file.largest()),
                Some((lo, hi)) => (lo.min(file.smallest()), hi.max(file.largest())),
            });
        }
        let Some((lo, hi)) = range else {
            return Vec::new();
        };
        let mut changed = false;
        for (file, chosen) in files.iter().zip(selected.iter_mut()) {
            if !*chosen && file.overlaps(Some(lo), Some(hi)) {
                *chosen = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    files
        .iter()
        .zip(&selected)
        .filter(|(_, s)| **s)
        .map(|(f, _)| Arc::clone(f))
        .collect()
}

fn read_table(file: &Arc<TableFile>, settings: BlockReadSettings) -> Result<Vec<CompactionEntry>> {
    let mut iter = TableIterator::new(Arc::clone(file), settings);
    let mut entries = Vec::new();
    let mut valid = iter.seek_to_first()?;
    while valid {
        let key: InternalKey = iter.key().clone();
        entries.push((key, iter.value()?));
        valid = iter.next()?;
    }
    Ok(entries)
}

fn transfer(source: &Path, target: &Path, move_files: bool) -> Result<()> {
    if move_files && fs::rename(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target).map_err(|e| {
        Status::io_error(format!("Failed to copy {}: {e}", source.display()))
    })?;
    if move_files {
        fs::remove_file(source)?;
    }
    Ok(())
}
