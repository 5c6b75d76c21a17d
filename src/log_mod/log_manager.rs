use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use super::log_record::{LogEntry, LogRecord, LogRecordType, HEADER_SIZE, NO_CHECKPOINT};
use crate::buffer::{BufferManager, PageCache, PageImage};
use crate::common::{PageID, Result, TransactionID, TxStoreError};
use crate::storage::Catalog;

/// What `recover` found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Committed after-images written back.
    pub redone: usize,
    /// Loser before-images written back.
    pub undone: usize,
    /// Transactions with no COMMIT or ABORT, now closed with an ABORT record.
    pub losers: Vec<TransactionID>,
    pub max_txn_id: Option<TransactionID>,
}

/// State guarded by the log mutex.
pub(crate) struct LogFile {
    path: PathBuf,
    file: File,
    current_offset: u64,
    // Set until the first append or recover. The first append wipes the file.
    recovery_undecided: bool,
    first_record: HashMap<TransactionID, u64>,
    record_counts: HashMap<LogRecordType, u64>,
}

impl LogFile {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let current_offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            current_offset,
            recovery_undecided: true,
            first_record: HashMap::new(),
            record_counts: HashMap::new(),
        })
    }

    fn pre_append(&mut self) -> Result<()> {
        if !self.recovery_undecided {
            return Ok(());
        }
        self.recovery_undecided = false;
        self.reset()?;
        debug!("Starting a fresh log at {}", self.path.display());
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.write_header(NO_CHECKPOINT)?;
        self.current_offset = HEADER_SIZE;
        self.first_record.clear();
        Ok(())
    }

    fn append(&mut self, record: &LogRecord) -> Result<u64> {
        self.pre_append()?;
        let start = self.current_offset;
        let bytes = record.encode(start)?;
        self.file.seek(SeekFrom::Start(start))?;
        self.file.write_all(&bytes)?;
        self.current_offset += bytes.len() as u64;
        *self.record_counts.entry(record.record_type()).or_insert(0) += 1;
        Ok(start)
    }

    pub(crate) fn force(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn first_offset(&self, txn: TransactionID) -> Result<u64> {
        self.first_record
            .get(&txn)
            .copied()
            .ok_or(TxStoreError::UnknownTransaction(txn))
    }

    fn begin(&mut self, txn: TransactionID) -> Result<()> {
        self.pre_append()?;
        if self.first_record.contains_key(&txn) {
            return Err(TxStoreError::DuplicateBegin(txn));
        }
        let offset = self.append(&LogRecord::Begin(txn))?;
        self.first_record.insert(txn, offset);
        Ok(())
    }

    fn commit(&mut self, txn: TransactionID) -> Result<()> {
        self.pre_append()?;
        self.first_offset(txn)?;
        self.append(&LogRecord::Commit(txn))?;
        self.force()?;
        self.first_record.remove(&txn);
        Ok(())
    }

    pub(crate) fn append_update(
        &mut self,
        txn: TransactionID,
        before: PageImage,
        after: PageImage,
    ) -> Result<u64> {
        self.append(&LogRecord::Update { txn, before, after })
    }

    /// Writes back the before-image of every UPDATE `txn` logged, newest
    /// first, and drops those pages from the cache.
    pub(crate) fn rollback(
        &mut self,
        txn: TransactionID,
        cache: &mut PageCache,
        catalog: &Catalog,
    ) -> Result<usize> {
        self.pre_append()?;
        let start = self.first_offset(txn)?;
        let (entries, _) = self.scan(start, self.current_offset, false)?;

        let images: Vec<PageImage> = entries
            .into_iter()
            .filter_map(|entry| match entry.record {
                LogRecord::Update { txn: owner, before, .. } if owner == txn => Some(before),
                _ => None,
            })
            .collect();

        for image in images.iter().rev() {
            catalog.write_image(image)?;
            cache.discard(image.page_id);
        }
        if !images.is_empty() {
            catalog.sync_all()?;
        }
        debug!("Rolled back {} page images for {}", images.len(), txn);
        Ok(images.len())
    }

    pub(crate) fn abort(
        &mut self,
        txn: TransactionID,
        cache: &mut PageCache,
        catalog: &Catalog,
    ) -> Result<()> {
        self.pre_append()?;
        self.first_offset(txn)?;
        let restored = self.rollback(txn, cache, catalog)?;
        self.append(&LogRecord::Abort(txn))?;
        self.force()?;
        self.first_record.remove(&txn);
        info!("{} aborted, {} page images restored", txn, restored);
        Ok(())
    }

    /// Appends a CHECKPOINT naming the live transactions and points the
    /// header at it.
    fn write_checkpoint(&mut self) -> Result<u64> {
        let mut active: Vec<(TransactionID, u64)> =
            self.first_record.iter().map(|(t, o)| (*t, *o)).collect();
        active.sort();

        let offset = self.append(&LogRecord::Checkpoint { active })?;
        // The record must be durable before the header may point at it.
        self.force()?;
        self.write_header(offset as i64)?;
        self.force()?;
        Ok(offset)
    }

    fn write_header(&mut self, checkpoint: i64) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_i64::<BigEndian>(checkpoint)?;
        Ok(())
    }

    fn read_header(&mut self) -> Result<i64> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(self.file.read_i64::<BigEndian>()?)
    }

    fn checkpoint_offset(&mut self) -> Result<Option<u64>> {
        if self.file.metadata()?.len() < HEADER_SIZE {
            return Ok(None);
        }
        match self.read_header()? {
            NO_CHECKPOINT => Ok(None),
            offset if offset < HEADER_SIZE as i64 => Err(TxStoreError::LogCorrupted(format!(
                "checkpoint pointer {} inside the header",
                offset
            ))),
            offset => Ok(Some(offset as u64)),
        }
    }

    /// Live transactions recorded by the checkpoint at `offset`.
    fn checkpoint_at(&self, offset: u64) -> Result<Vec<(TransactionID, u64)>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        match read_entry_at(&mut reader, offset)?.record {
            LogRecord::Checkpoint { active } => Ok(active),
            other => Err(TxStoreError::LogCorrupted(format!(
                "checkpoint pointer {} names a {:?} record",
                offset,
                other.record_type()
            ))),
        }
    }

    /// Decodes the records in `[from, to)`. With `tolerate_torn`, a record cut
    /// short by the end of the file ends the scan instead of failing it.
    /// Returns the records and the offset just past the last whole one.
    fn scan(&self, from: u64, to: u64, tolerate_torn: bool) -> Result<(Vec<LogEntry>, u64)> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(from))?;

        let mut entries = Vec::new();
        let mut offset = from;
        while offset < to {
            let record = match LogRecord::decode(&mut reader) {
                Ok((record, start)) if start == offset => record,
                Ok((_, start)) => {
                    return Err(TxStoreError::LogCorrupted(format!(
                        "record at {} claims to start at {}",
                        offset, start
                    )))
                }
                Err(TxStoreError::IOError(e))
                    if tolerate_torn && e.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(e) => return Err(e),
            };
            let next = offset + record.encoded_len();
            entries.push(LogEntry { offset, record });
            offset = next;
        }
        Ok((entries, offset.min(to)))
    }

    /// Drops everything before the oldest record still needed: the last
    /// checkpoint or the first record of a transaction it lists.
    fn truncate(&mut self) -> Result<()> {
        self.pre_append()?;
        let checkpoint = match self.checkpoint_offset()? {
            Some(offset) => offset,
            None => {
                debug!("No checkpoint yet, nothing to truncate");
                return Ok(());
            }
        };

        let active = self.checkpoint_at(checkpoint)?;
        let keep_from = active
            .iter()
            .map(|(_, first)| *first)
            .chain(std::iter::once(checkpoint))
            .min()
            .unwrap_or(checkpoint);
        if keep_from <= HEADER_SIZE {
            return Ok(());
        }
        let shift = keep_from - HEADER_SIZE;
        let (entries, _) = self.scan(keep_from, self.current_offset, false)?;

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wal".to_string());
        let tmp_path = self
            .path
            .with_file_name(format!("{}.{}.tmp", file_name, Uuid::new_v4()));

        let mut moved_firsts = HashMap::new();
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            out.write_i64::<BigEndian>((checkpoint - shift) as i64)?;
            for entry in entries {
                let start = entry.offset - shift;
                let record = match entry.record {
                    LogRecord::Begin(txn) => {
                        moved_firsts.insert(txn, start);
                        LogRecord::Begin(txn)
                    }
                    // Older checkpoints may name transactions whose first
                    // record is gone; they finished before this one.
                    LogRecord::Checkpoint { active } => LogRecord::Checkpoint {
                        active: active
                            .into_iter()
                            .filter(|(_, first)| *first >= keep_from)
                            .map(|(txn, first)| (txn, first - shift))
                            .collect(),
                    },
                    other => other,
                };
                out.write_all(&record.encode(start)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        self.sync_directory()?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.current_offset = self.file.metadata()?.len();
        for (txn, first) in self.first_record.iter_mut() {
            if let Some(moved) = moved_firsts.get(txn) {
                *first = *moved;
            }
        }

        info!("Truncated log: dropped {} bytes before offset {}", shift, keep_from);
        Ok(())
    }

    /// Makes a rename inside the log's directory durable.
    fn sync_directory(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    /// The checkpoint recovery can start from. A header pointing at a record
    /// that never fully reached the disk is reset, and the whole log is used.
    fn usable_checkpoint(&mut self) -> Result<Option<(u64, Vec<(TransactionID, u64)>)>> {
        let offset = match self.checkpoint_offset()? {
            Some(offset) => offset,
            None => return Ok(None),
        };
        match self.checkpoint_at(offset) {
            Ok(active) => Ok(Some((offset, active))),
            Err(TxStoreError::IOError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(
                    "Checkpoint at offset {} is incomplete, recovering from the log start",
                    offset
                );
                self.write_header(NO_CHECKPOINT)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn recover(&mut self, cache: &mut PageCache, catalog: &Catalog) -> Result<RecoveryReport> {
        self.recovery_undecided = false;
        self.first_record.clear();

        let len = self.file.metadata()?.len();
        if len < HEADER_SIZE {
            self.reset()?;
            self.force()?;
            info!("Empty log, nothing to recover");
            return Ok(RecoveryReport::default());
        }

        let mut begun: HashSet<TransactionID> = HashSet::new();
        let mut start = HEADER_SIZE;
        if let Some((checkpoint, active)) = self.usable_checkpoint()? {
            start = active
                .iter()
                .map(|(_, first)| *first)
                .chain(std::iter::once(checkpoint))
                .min()
                .unwrap_or(checkpoint);
            begun.extend(active.iter().map(|(txn, _)| *txn));
        }

        let (entries, valid_end) = self.scan(start, len, true)?;
        if valid_end < len {
            warn!(
                "Discarding {} bytes of incomplete log tail at offset {}",
                len - valid_end,
                valid_end
            );
            self.file.set_len(valid_end)?;
        }
        self.current_offset = valid_end;

        // Analysis
        let mut committed = HashSet::new();
        let mut finished = HashSet::new();
        let mut max_txn_id: Option<TransactionID> = None;
        for entry in &entries {
            let mut seen = |txn: TransactionID| {
                max_txn_id = Some(max_txn_id.map_or(txn, |max| max.max(txn)));
            };
            match &entry.record {
                LogRecord::Begin(txn) | LogRecord::Update { txn, .. } => {
                    seen(*txn);
                    begun.insert(*txn);
                }
                LogRecord::Commit(txn) => {
                    seen(*txn);
                    committed.insert(*txn);
                    finished.insert(*txn);
                }
                LogRecord::Abort(txn) => {
                    seen(*txn);
                    finished.insert(*txn);
                }
                LogRecord::Checkpoint { active } => {
                    for (txn, _) in active {
                        seen(*txn);
                    }
                }
            }
        }
        let losers: HashSet<TransactionID> = begun.difference(&finished).copied().collect();

        // Redo
        let mut touched: HashSet<PageID> = HashSet::new();
        let mut redone = 0;
        for entry in &entries {
            if let LogRecord::Update { txn, after, .. } = &entry.record {
                if committed.contains(txn) {
                    catalog.write_image(after)?;
                    touched.insert(after.page_id);
                    redone += 1;
                }
            }
        }

        // Undo, newest first
        let mut undone = 0;
        if !losers.is_empty() {
            let mut reader = BufReader::new(File::open(&self.path)?);
            let mut end = valid_end;
            while end > start {
                let entry = read_entry_before(&mut reader, end)?;
                if let LogRecord::Update { txn, before, .. } = &entry.record {
                    if losers.contains(txn) {
                        catalog.write_image(before)?;
                        touched.insert(before.page_id);
                        undone += 1;
                    }
                }
                end = entry.offset;
            }
        }

        for page_id in &touched {
            cache.discard(*page_id);
        }
        catalog.sync_all()?;

        let mut losers: Vec<TransactionID> = losers.into_iter().collect();
        losers.sort();
        for txn in &losers {
            self.append(&LogRecord::Abort(*txn))?;
        }
        self.force()?;

        info!(
            "Recovery finished: {} redone, {} undone, {} losers",
            redone,
            undone,
            losers.len()
        );
        Ok(RecoveryReport {
            redone,
            undone,
            losers,
            max_txn_id,
        })
    }
}

fn read_entry_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<LogEntry> {
    reader.seek(SeekFrom::Start(offset))?;
    let (record, start) = LogRecord::decode(reader)?;
    if start != offset {
        return Err(TxStoreError::LogCorrupted(format!(
            "record at {} claims to start at {}",
            offset, start
        )));
    }
    Ok(LogEntry { offset, record })
}

/// Reads the record ending at `end` through its trailing start offset.
fn read_entry_before<R: Read + Seek>(reader: &mut R, end: u64) -> Result<LogEntry> {
    if end < HEADER_SIZE + 8 {
        return Err(TxStoreError::LogCorrupted(format!(
            "no record can end at {}",
            end
        )));
    }
    reader.seek(SeekFrom::Start(end - 8))?;
    let start = reader.read_i64::<BigEndian>()?;
    if start < HEADER_SIZE as i64 || start as u64 >= end {
        return Err(TxStoreError::LogCorrupted(format!(
            "record ending at {} claims to start at {}",
            end, start
        )));
    }
    read_entry_at(reader, start as u64)
}

/// Write-ahead log over a single file.
///
/// Opening a log does not decide what happens to its contents: `recover`
/// replays them, while appending anything first starts the log over.
pub struct LogManager {
    inner: Mutex<LogFile>,
}

impl LogManager {
    pub fn new(log_file_path: &Path) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(LogFile::open(log_file_path)?),
        })
    }

    pub(crate) fn lock_file(&self) -> MutexGuard<'_, LogFile> {
        self.inner.lock()
    }

    pub fn log_txn_begin(&self, txn: TransactionID) -> Result<()> {
        self.inner.lock().begin(txn)
    }

    /// True between `txn`'s BEGIN and its COMMIT or ABORT.
    pub fn has_begun(&self, txn: TransactionID) -> bool {
        self.inner.lock().first_record.contains_key(&txn)
    }

    /// Appends COMMIT and forces the log. The caller has already flushed the
    /// transaction's dirty pages.
    pub fn log_commit(&self, txn: TransactionID) -> Result<()> {
        self.inner.lock().commit(txn)?;
        debug!("{} committed", txn);
        Ok(())
    }

    /// Rolls `txn` back, appends ABORT and forces the log. Pages the
    /// transaction dirtied but never flushed are dropped from the cache.
    pub fn log_abort(&self, txn: TransactionID, pool: &BufferManager) -> Result<()> {
        let mut cache = pool.lock_cache();
        cache.discard_dirtied_by(txn);
        let mut log = self.inner.lock();
        log.abort(txn, &mut cache, pool.catalog())
    }

    pub fn log_update(&self, txn: TransactionID, before: &PageImage, after: &PageImage) -> Result<()> {
        self.inner
            .lock()
            .append_update(txn, before.clone(), after.clone())?;
        Ok(())
    }

    /// Restores the before-images of `txn`'s logged updates without closing
    /// the transaction.
    pub fn rollback(&self, txn: TransactionID, pool: &BufferManager) -> Result<()> {
        let mut cache = pool.lock_cache();
        let mut log = self.inner.lock();
        log.rollback(txn, &mut cache, pool.catalog())?;
        Ok(())
    }

    /// Flushes every dirty page, records the live transactions, then
    /// truncates the log up to what recovery still needs.
    pub fn log_checkpoint(&self, pool: &BufferManager) -> Result<()> {
        let mut cache = pool.lock_cache();
        let mut log = self.inner.lock();
        log.pre_append()?;
        log.force()?;
        let flushed = pool.flush_cached(&mut cache, &mut log, |_| true)?;
        pool.catalog().sync_all()?;
        let offset = log.write_checkpoint()?;
        drop(cache);

        info!(
            "Checkpoint at offset {} after flushing {} pages",
            offset,
            flushed.len()
        );
        log.truncate()
    }

    pub fn log_truncate(&self) -> Result<()> {
        self.inner.lock().truncate()
    }

    /// Replays the log into storage: committed work is redone, unfinished
    /// work undone. Every table the log mentions must be in the catalog.
    pub fn recover(&self, pool: &BufferManager) -> Result<RecoveryReport> {
        let mut cache = pool.lock_cache();
        let mut log = self.inner.lock();
        log.recover(&mut cache, pool.catalog())
    }

    /// Checkpoints and leaves the log forced.
    pub fn shutdown(&self, pool: &BufferManager) -> Result<()> {
        self.log_checkpoint(pool)?;
        self.force()?;
        info!("Log shut down at offset {}", self.current_offset());
        Ok(())
    }

    pub fn force(&self) -> Result<()> {
        self.inner.lock().force()
    }

    /// Every whole record currently in the file, oldest first.
    pub fn records(&self) -> Result<Vec<LogEntry>> {
        let log = self.inner.lock();
        let len = log.file.metadata()?.len();
        if len < HEADER_SIZE {
            return Ok(Vec::new());
        }
        let (entries, _) = log.scan(HEADER_SIZE, len, false)?;
        Ok(entries)
    }

    pub fn last_checkpoint(&self) -> Result<Option<u64>> {
        self.inner.lock().checkpoint_offset()
    }

    /// Transactions that have begun and not finished, with their first record offset.
    pub fn active_transactions(&self) -> Vec<(TransactionID, u64)> {
        let log = self.inner.lock();
        let mut active: Vec<(TransactionID, u64)> =
            log.first_record.iter().map(|(t, o)| (*t, *o)).collect();
        active.sort();
        active
    }

    pub fn current_offset(&self) -> u64 {
        self.inner.lock().current_offset
    }

    pub fn get_total_log_records(&self) -> u64 {
        self.inner.lock().record_counts.values().sum()
    }

    pub fn get_total_log_records_of_type(&self, record_type: LogRecordType) -> u64 {
        self.inner
            .lock()
            .record_counts
            .get(&record_type)
            .copied()
            .unwrap_or(0)
    }

    /// One line per record, for debugging.
    pub fn describe(&self) -> Result<String> {
        let mut out = String::new();
        if let Some(checkpoint) = self.last_checkpoint()? {
            out.push_str(&format!("header: checkpoint at {}\n", checkpoint));
        } else {
            out.push_str("header: no checkpoint\n");
        }
        for entry in self.records()? {
            let line = match &entry.record {
                LogRecord::Update { txn, after, .. } => {
                    format!("{:>8} UPDATE {} page {}", entry.offset, txn, after.page_id)
                }
                LogRecord::Checkpoint { active } => {
                    format!("{:>8} CHECKPOINT {} active", entry.offset, active.len())
                }
                LogRecord::Begin(txn) => format!("{:>8} BEGIN {}", entry.offset, txn),
                LogRecord::Commit(txn) => format!("{:>8} COMMIT {}", entry.offset, txn),
                LogRecord::Abort(txn) => format!("{:>8} ABORT {}", entry.offset, txn),
            };
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}
