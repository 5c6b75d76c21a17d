use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use parking_lot::Mutex;

use crate::buffer::BufferManager;
use crate::common::{Result, TransactionID, TxStoreError};

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionID,
    pub started_at: Instant,
}

impl Transaction {
    pub fn new(id: TransactionID) -> Self {
        Self {
            id,
            started_at: Instant::now(),
        }
    }
}

/// Hands out transaction ids and drives commit and abort through the buffer pool.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    active_transactions: Mutex<HashMap<TransactionID, Transaction>>,
    buffer_manager: Arc<BufferManager>,
}

impl TransactionManager {
    pub fn new(buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            active_transactions: Mutex::new(HashMap::new()),
            buffer_manager,
        }
    }

    /// Allocates a fresh id and logs its BEGIN.
    pub fn start_txn(&self) -> Result<TransactionID> {
        let txn_id = TransactionID(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        self.buffer_manager.log_manager().log_txn_begin(txn_id)?;
        self.active_transactions
            .lock()
            .insert(txn_id, Transaction::new(txn_id));
        debug!("Started {}", txn_id);
        Ok(txn_id)
    }

    pub fn commit_txn(&self, txn_id: TransactionID) -> Result<()> {
        let txn = self.take(txn_id)?;
        self.buffer_manager.transaction_complete(txn_id, true)?;
        info!("Committed {} after {:?}", txn_id, txn.started_at.elapsed());
        Ok(())
    }

    /// Rolls `txn_id` back. Also the way to finish a transaction whose lock
    /// request came back aborted.
    pub fn abort_txn(&self, txn_id: TransactionID) -> Result<()> {
        let txn = self.take(txn_id)?;
        self.buffer_manager.transaction_complete(txn_id, false)?;
        info!("Aborted {} after {:?}", txn_id, txn.started_at.elapsed());
        Ok(())
    }

    /// Makes sure ids handed out from now on are above `txn_id`.
    pub fn advance_past(&self, txn_id: TransactionID) {
        self.next_txn_id.fetch_max(txn_id.0 + 1, Ordering::SeqCst);
    }

    pub fn is_active(&self, txn_id: TransactionID) -> bool {
        self.active_transactions.lock().contains_key(&txn_id)
    }

    pub fn active_transactions(&self) -> Vec<TransactionID> {
        let mut ids: Vec<TransactionID> = self.active_transactions.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    fn take(&self, txn_id: TransactionID) -> Result<Transaction> {
        self.active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or(TxStoreError::UnknownTransaction(txn_id))
    }
}
