use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, MutexGuard, RwLock};

use super::page::{Page, PageRef};
use crate::common::{
    AbortReason, DatabaseConfig, PageID, Permissions, RecordID, Result, TableID, TransactionID,
    TxStoreError,
};
use crate::concurrency::{LockManager, LockMode};
use crate::log_mod::{LogFile, LogManager};
use crate::storage::Catalog;

/// Cached pages with a last-access tick for LRU eviction.
#[derive(Default)]
pub(crate) struct PageCache {
    pages: HashMap<PageID, PageRef>,
    last_access: HashMap<PageID, u64>,
    clock: u64,
}

impl PageCache {
    fn get(&self, page_id: PageID) -> Option<&PageRef> {
        self.pages.get(&page_id)
    }

    fn touch(&mut self, page_id: PageID) {
        self.clock += 1;
        self.last_access.insert(page_id, self.clock);
    }

    fn put(&mut self, page_id: PageID, page: PageRef) {
        self.pages.insert(page_id, page);
        self.touch(page_id);
    }

    fn len(&self) -> usize {
        self.pages.len()
    }

    fn victim(&self) -> Option<PageID> {
        self.last_access
            .iter()
            .min_by_key(|(_, tick)| **tick)
            .map(|(page_id, _)| *page_id)
    }

    pub(crate) fn discard(&mut self, page_id: PageID) -> bool {
        self.last_access.remove(&page_id);
        self.pages.remove(&page_id).is_some()
    }

    pub(crate) fn discard_dirtied_by(&mut self, txn: TransactionID) -> usize {
        let stale: Vec<PageID> = self
            .pages
            .iter()
            .filter(|(_, page)| page.read().is_dirty() == Some(txn))
            .map(|(page_id, _)| *page_id)
            .collect();
        for page_id in &stale {
            self.discard(*page_id);
        }
        stale.len()
    }
}

/// Page cache between transactions and table files.
///
/// Every page access goes through `fetch_page`, which takes the matching
/// page lock first. Dirty pages reach storage only after an UPDATE record
/// with their before and after images has been forced to the log.
///
/// Internal lock order is cache, then log, then page. Callers must not hold
/// a page guard while calling back into the pool.
pub struct BufferManager {
    page_size: usize,
    capacity: usize,
    cache: Mutex<PageCache>,
    // Transactions already rolled back by a failed lock request.
    rolled_back: Mutex<HashMap<TransactionID, AbortReason>>,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    catalog: Arc<Catalog>,
}

impl BufferManager {
    pub fn new(
        config: &DatabaseConfig,
        lock_manager: Arc<LockManager>,
        log_manager: Arc<LogManager>,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            page_size: config.page_size,
            capacity: config.buffer_pool_pages,
            cache: Mutex::new(PageCache::default()),
            rolled_back: Mutex::new(HashMap::new()),
            lock_manager,
            log_manager,
            catalog,
        }
    }

    /// Locks `page_id` for `txn` and returns the cached page, loading it
    /// from its table file on a miss. Repeated fetches of a cached page
    /// return the same instance.
    ///
    /// If the lock request ends in an abort, `txn` is rolled back while it
    /// still holds its locks, and only then are they all released. Ending
    /// the transaction afterwards with an abort is a no-op.
    pub fn fetch_page(
        &self,
        txn: TransactionID,
        page_id: PageID,
        perm: Permissions,
    ) -> Result<PageRef> {
        if let Err(e) = self.lock_manager.acquire(txn, page_id, LockMode::from(perm)) {
            if let TxStoreError::TransactionAborted { reason, .. } = &e {
                let rolled_back = self.roll_back_in_place(txn, *reason);
                self.lock_manager.release_all(txn);
                rolled_back?;
            }
            return Err(e);
        }

        let mut cache = self.cache.lock();
        if let Some(page) = cache.get(page_id).cloned() {
            cache.touch(page_id);
            return Ok(page);
        }

        let data = self
            .catalog
            .get_database_file(page_id.table_id)?
            .read_page(page_id)?;
        debug!("Loaded page {} for {}", page_id, txn);

        let page = Arc::new(RwLock::new(Page::new(page_id, data)));
        self.make_room(&mut cache)?;
        cache.put(page_id, Arc::clone(&page));
        Ok(page)
    }

    /// Drops `txn`'s lock on one page ahead of transaction end.
    pub fn release_page(&self, txn: TransactionID, page_id: PageID) {
        self.lock_manager.release(txn, page_id);
    }

    pub fn holds_lock(&self, txn: TransactionID, page_id: PageID) -> bool {
        self.lock_manager.holds(txn, page_id)
    }

    pub fn insert_tuple(&self, txn: TransactionID, table_id: TableID, tuple: &[u8]) -> Result<RecordID> {
        let file = self.catalog.get_database_file(table_id)?;
        let (record_id, pages) = file.insert_tuple(txn, tuple, self)?;
        self.install_dirty(txn, pages)?;
        Ok(record_id)
    }

    pub fn delete_tuple(&self, txn: TransactionID, record_id: RecordID) -> Result<()> {
        let file = self.catalog.get_database_file(record_id.page_id.table_id)?;
        let pages = file.delete_tuple(txn, record_id, self)?;
        self.install_dirty(txn, pages)
    }

    /// Ends `txn`. On commit its dirty pages are flushed and COMMIT is
    /// forced; on abort its logged updates are rolled back and ABORT is
    /// forced. All of its locks are released either way.
    pub fn transaction_complete(&self, txn: TransactionID, commit: bool) -> Result<()> {
        if let Some(reason) = self.rolled_back.lock().remove(&txn) {
            self.lock_manager.release_all(txn);
            return if commit {
                Err(TxStoreError::TransactionAborted { txn, reason })
            } else {
                Ok(())
            };
        }
        let outcome = if commit {
            self.commit_pages(txn)
        } else {
            self.log_manager.log_abort(txn, self)
        };
        self.lock_manager.release_all(txn);
        outcome
    }

    /// Undoes `txn` and logs its ABORT without touching its locks.
    fn roll_back_in_place(&self, txn: TransactionID, reason: AbortReason) -> Result<()> {
        if !self.log_manager.has_begun(txn) {
            // Nothing logged, so nothing of it reached storage.
            self.cache.lock().discard_dirtied_by(txn);
            return Ok(());
        }
        self.log_manager.log_abort(txn, self)?;
        self.rolled_back.lock().insert(txn, reason);
        Ok(())
    }

    fn commit_pages(&self, txn: TransactionID) -> Result<()> {
        let flushed = {
            let mut cache = self.cache.lock();
            let mut log = self.log_manager.lock_file();
            self.flush_cached(&mut cache, &mut log, |page| page.is_dirty() == Some(txn))?
        };
        debug!("Flushed {} pages for committing {}", flushed.len(), txn);
        self.log_manager.log_commit(txn)
    }

    /// Flushes every dirty page and releases all locks held on the flushed pages.
    pub fn flush_all_pages(&self) -> Result<()> {
        let flushed = {
            let mut cache = self.cache.lock();
            let mut log = self.log_manager.lock_file();
            self.flush_cached(&mut cache, &mut log, |_| true)?
        };
        for page_id in &flushed {
            self.lock_manager.release_page(*page_id);
        }
        Ok(())
    }

    /// Flushes the dirty pages `txn` holds locks on, then drops those locks.
    pub fn flush_pages(&self, txn: TransactionID) -> Result<()> {
        let held: HashSet<PageID> = self.lock_manager.pages_held_by(txn).into_iter().collect();
        let flushed = {
            let mut cache = self.cache.lock();
            let mut log = self.log_manager.lock_file();
            self.flush_cached(&mut cache, &mut log, |page| held.contains(&page.id()))?
        };
        for page_id in &flushed {
            self.lock_manager.release(txn, *page_id);
        }
        Ok(())
    }

    /// Forgets a cached page without writing it. Missing pages are ignored.
    pub fn discard_page(&self, page_id: PageID) {
        if self.cache.lock().discard(page_id) {
            debug!("Discarded page {}", page_id);
        }
    }

    pub fn is_cached(&self, page_id: PageID) -> bool {
        self.cache.lock().get(page_id).is_some()
    }

    pub fn num_cached_pages(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub(crate) fn lock_cache(&self) -> MutexGuard<'_, PageCache> {
        self.cache.lock()
    }

    /// Marks pages a table file modified as dirtied by `txn`, putting back
    /// any that were evicted while the file worked on them.
    fn install_dirty(&self, txn: TransactionID, pages: Vec<PageRef>) -> Result<()> {
        let mut cache = self.cache.lock();
        for page in pages {
            let page_id = {
                let mut guard = page.write();
                guard.mark_dirty(Some(txn));
                guard.id()
            };
            let cached = matches!(cache.get(page_id), Some(current) if Arc::ptr_eq(current, &page));
            if cached {
                cache.touch(page_id);
                continue;
            }
            if cache.get(page_id).is_none() {
                self.make_room(&mut cache)?;
            }
            cache.put(page_id, page);
        }
        Ok(())
    }

    fn make_room(&self, cache: &mut PageCache) -> Result<()> {
        while cache.len() >= self.capacity {
            let victim = match cache.victim() {
                Some(page_id) => page_id,
                None => break,
            };
            self.evict(cache, victim)?;
        }
        Ok(())
    }

    fn evict(&self, cache: &mut PageCache, victim: PageID) -> Result<()> {
        let dirty = cache
            .get(victim)
            .map_or(false, |page| page.read().is_dirty().is_some());
        if dirty {
            let mut log = self.log_manager.lock_file();
            self.flush_cached(cache, &mut log, |page| page.id() == victim)?;
        }
        cache.discard(victim);
        debug!("Evicted page {}{}", victim, if dirty { " after flushing" } else { "" });
        Ok(())
    }

    /// Writes the selected dirty pages back. Each gets an UPDATE record
    /// carrying its before and after images; the log is forced before any
    /// page reaches storage. Flushed pages are clean and take their current
    /// contents as the new before-image. Locks are left alone.
    pub(crate) fn flush_cached<F>(
        &self,
        cache: &mut PageCache,
        log: &mut LogFile,
        select: F,
    ) -> Result<Vec<PageID>>
    where
        F: Fn(&Page) -> bool,
    {
        let mut pending = Vec::new();
        for (page_id, page) in cache.pages.iter() {
            let selected = {
                let guard = page.read();
                guard.is_dirty().is_some() && select(&*guard)
            };
            if !selected {
                continue;
            }

            let mut page = page.write();
            if let Some(owner) = page.is_dirty() {
                log.append_update(owner, page.before_image(), page.image())?;
                pending.push((*page_id, owner, page.get_data().to_vec()));
                page.mark_dirty(None);
                page.set_before_image();
            }
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        log.force()?;
        for (i, (page_id, _, data)) in pending.iter().enumerate() {
            let written = self
                .catalog
                .get_database_file(page_id.table_id)
                .and_then(|file| file.write_page(*page_id, data));
            if let Err(e) = written {
                // Keep unwritten pages dirty so nothing is silently dropped.
                for (page_id, owner, _) in &pending[i..] {
                    if let Some(page) = cache.get(*page_id) {
                        page.write().mark_dirty(Some(*owner));
                    }
                }
                return Err(e);
            }
        }

        debug!("Flushed {} pages", pending.len());
        Ok(pending.into_iter().map(|(page_id, _, _)| page_id).collect())
    }
}
