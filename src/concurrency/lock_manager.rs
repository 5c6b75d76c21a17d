//! Page-level shared/exclusive locks with wait-for deadlock detection.
//!
//! All lock tables and the wait-for graph sit behind one mutex so that a
//! grant and the cycle check that precedes it are observed atomically.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use super::WaitForGraph;
use crate::common::{AbortReason, DatabaseConfig, PageID, Permissions, Result, TransactionID, TxStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl From<Permissions> for LockMode {
    fn from(perm: Permissions) -> Self {
        match perm {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

#[derive(Debug, Default)]
struct LockTables {
    shared: HashMap<PageID, HashSet<TransactionID>>,
    exclusive: HashMap<PageID, TransactionID>,
    held: HashMap<TransactionID, HashSet<PageID>>,
    // The page each blocked transaction is waiting for.
    waiting_on: HashMap<TransactionID, PageID>,
    waits_for: WaitForGraph,
}

impl LockTables {
    /// Transactions whose current locks keep `txn` from getting `mode` on `page_id`.
    fn blockers(&self, txn: TransactionID, page_id: PageID, mode: LockMode) -> Vec<TransactionID> {
        let mut holders = Vec::new();
        if let Some(&owner) = self.exclusive.get(&page_id) {
            if owner != txn {
                holders.push(owner);
            }
        }
        if mode == LockMode::Exclusive {
            if let Some(sharers) = self.shared.get(&page_id) {
                holders.extend(sharers.iter().copied().filter(|&t| t != txn));
            }
        }
        holders
    }

    fn grant(&mut self, txn: TransactionID, page_id: PageID, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                // An exclusive lock already covers reads.
                if self.exclusive.get(&page_id) != Some(&txn) {
                    self.shared.entry(page_id).or_default().insert(txn);
                }
            }
            LockMode::Exclusive => {
                // Upgrade replaces the shared hold.
                if let Some(sharers) = self.shared.get_mut(&page_id) {
                    sharers.remove(&txn);
                    if sharers.is_empty() {
                        self.shared.remove(&page_id);
                    }
                }
                self.exclusive.insert(page_id, txn);
            }
        }
        self.held.entry(txn).or_default().insert(page_id);
    }

    fn release(&mut self, txn: TransactionID, page_id: PageID) -> bool {
        let mut released = false;
        if let Some(sharers) = self.shared.get_mut(&page_id) {
            released |= sharers.remove(&txn);
            if sharers.is_empty() {
                self.shared.remove(&page_id);
            }
        }
        if self.exclusive.get(&page_id) == Some(&txn) {
            self.exclusive.remove(&page_id);
            released = true;
        }
        if let Some(pages) = self.held.get_mut(&txn) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.held.remove(&txn);
            }
        }
        released
    }

    /// Releases `txn`'s lock on `page_id` and drops the wait-for edges of
    /// transactions blocked on that page that pointed at `txn`.
    fn release_and_unblock(&mut self, txn: TransactionID, page_id: PageID) -> bool {
        let released = self.release(txn, page_id);
        if released {
            let waiters: Vec<TransactionID> = self
                .waiting_on
                .iter()
                .filter(|(_, waited)| **waited == page_id)
                .map(|(waiter, _)| *waiter)
                .collect();
            for waiter in waiters {
                self.waits_for.remove_edge(waiter, txn);
            }
        }
        released
    }

    fn stop_waiting(&mut self, txn: TransactionID) {
        self.waiting_on.remove(&txn);
        self.waits_for.clear_waits(txn);
    }

    fn mode_of(&self, txn: TransactionID, page_id: PageID) -> Option<LockMode> {
        if self.exclusive.get(&page_id) == Some(&txn) {
            Some(LockMode::Exclusive)
        } else if self.shared.get(&page_id).map_or(false, |s| s.contains(&txn)) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }
}

/// Point-in-time copy of the lock tables. For diagnostics only.
#[derive(Debug, Clone, Default)]
pub struct LockTableSnapshot {
    pub shared: HashMap<PageID, Vec<TransactionID>>,
    pub exclusive: HashMap<PageID, TransactionID>,
    pub held: HashMap<TransactionID, Vec<PageID>>,
}

pub struct LockManager {
    tables: Mutex<LockTables>,
    released: Condvar,
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::from_config(&DatabaseConfig::default())
    }
}

impl LockManager {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            tables: Mutex::new(LockTables::default()),
            released: Condvar::new(),
            timeout,
            poll_interval,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(config.lock_timeout, config.lock_poll_interval)
    }

    /// Blocks until `txn` holds `mode` on `page_id`.
    ///
    /// Every round re-points the requester's wait-for edges at the current
    /// blockers and checks the graph for a cycle. A cycle or an expired
    /// timeout returns `TransactionAborted`; the caller is then expected to
    /// drop all of the transaction's locks with [`LockManager::release_all`].
    pub fn acquire(&self, txn: TransactionID, page_id: PageID, mode: LockMode) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut tables = self.tables.lock();

        loop {
            let blockers = tables.blockers(txn, page_id, mode);
            if blockers.is_empty() {
                tables.grant(txn, page_id, mode);
                tables.stop_waiting(txn);
                debug!("{} granted {:?} lock on page {}", txn, mode, page_id);
                return Ok(());
            }

            tables.waits_for.clear_waits(txn);
            tables.waiting_on.insert(txn, page_id);
            for holder in &blockers {
                tables.waits_for.add_edge(txn, *holder);
            }

            if let Some(cycle) = tables.waits_for.find_cycle() {
                tables.stop_waiting(txn);
                let path: Vec<String> = cycle.iter().map(|t| t.to_string()).collect();
                warn!(
                    "{} aborted requesting {:?} lock on page {}: cycle {}",
                    txn,
                    mode,
                    page_id,
                    path.join(" -> ")
                );
                return Err(TxStoreError::TransactionAborted {
                    txn,
                    reason: AbortReason::Deadlock,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                tables.stop_waiting(txn);
                warn!(
                    "{} timed out waiting for {:?} lock on page {} (blocked by {:?})",
                    txn, mode, page_id, blockers
                );
                return Err(TxStoreError::TransactionAborted {
                    txn,
                    reason: AbortReason::LockTimeout,
                });
            }

            let wait = (deadline - now).min(self.poll_interval);
            self.released.wait_for(&mut tables, wait);
        }
    }

    /// Drops `txn`'s hold on one page.
    pub fn release(&self, txn: TransactionID, page_id: PageID) {
        let mut tables = self.tables.lock();
        if tables.release_and_unblock(txn, page_id) {
            self.released.notify_all();
        }
    }

    /// Drops every holder's lock on one page.
    pub fn release_page(&self, page_id: PageID) {
        let mut tables = self.tables.lock();
        let mut holders: Vec<TransactionID> = tables
            .shared
            .get(&page_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        if let Some(&owner) = tables.exclusive.get(&page_id) {
            holders.push(owner);
        }
        for txn in holders {
            tables.release_and_unblock(txn, page_id);
        }
        self.released.notify_all();
    }

    /// Drops every lock `txn` holds and removes it from the wait-for graph.
    pub fn release_all(&self, txn: TransactionID) {
        let mut tables = self.tables.lock();
        let pages: Vec<PageID> = tables
            .held
            .get(&txn)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        for page_id in &pages {
            tables.release(txn, *page_id);
        }
        tables.held.remove(&txn);
        tables.waiting_on.remove(&txn);
        tables.waits_for.remove_vertex(txn);
        debug!("{} released {} page locks", txn, pages.len());
        self.released.notify_all();
    }

    pub fn holds(&self, txn: TransactionID, page_id: PageID) -> bool {
        self.tables.lock().mode_of(txn, page_id).is_some()
    }

    pub fn lock_mode(&self, txn: TransactionID, page_id: PageID) -> Option<LockMode> {
        self.tables.lock().mode_of(txn, page_id)
    }

    pub fn pages_held_by(&self, txn: TransactionID) -> Vec<PageID> {
        let tables = self.tables.lock();
        let mut pages: Vec<PageID> = tables
            .held
            .get(&txn)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }

    pub fn wait_for_graph(&self) -> WaitForGraph {
        self.tables.lock().waits_for.clone()
    }

    pub fn snapshot(&self) -> LockTableSnapshot {
        let tables = self.tables.lock();
        let sorted = |set: &HashSet<TransactionID>| {
            let mut v: Vec<TransactionID> = set.iter().copied().collect();
            v.sort();
            v
        };
        LockTableSnapshot {
            shared: tables.shared.iter().map(|(p, s)| (*p, sorted(s))).collect(),
            exclusive: tables.exclusive.clone(),
            held: tables
                .held
                .iter()
                .map(|(t, pages)| {
                    let mut v: Vec<PageID> = pages.iter().copied().collect();
                    v.sort();
                    (*t, v)
                })
                .collect(),
        }
    }
}
