pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod heap;
pub mod log_mod;
pub mod storage;
pub mod transaction;

pub use buffer::BufferManager;
pub use common::{
    DatabaseConfig, PageID, Permissions, RecordID, Result, TableID, TransactionID, TxStoreError,
};
pub use concurrency::LockManager;
pub use heap::HeapSegment;
pub use log_mod::{LogManager, RecoveryReport};
pub use storage::{Catalog, DBFiles};
pub use transaction::TransactionManager;

use std::path::Path;
use std::sync::Arc;

use log::info;

/// Every component of one database directory, wired together.
pub struct Database {
    files: DBFiles,
    config: DatabaseConfig,
    catalog: Arc<Catalog>,
    buffer_manager: Arc<BufferManager>,
    transaction_manager: TransactionManager,
}

impl Database {
    /// Opens or creates the database at `db_path`. An existing log is left
    /// untouched until `recover` replays it or the first transaction starts
    /// it over.
    pub fn open(db_path: &Path, config: DatabaseConfig) -> Result<Self> {
        let files = DBFiles::new(db_path)?;
        let catalog = Arc::new(Catalog::new());
        let lock_manager = Arc::new(LockManager::from_config(&config));
        let log_manager = Arc::new(LogManager::new(&files.get_log_file_path())?);
        let buffer_manager = Arc::new(BufferManager::new(
            &config,
            lock_manager,
            log_manager,
            Arc::clone(&catalog),
        ));
        let transaction_manager = TransactionManager::new(Arc::clone(&buffer_manager));

        info!("Opened database at {}", db_path.display());
        Ok(Self {
            files,
            config,
            catalog,
            buffer_manager,
            transaction_manager,
        })
    }

    /// Opens (or creates) the heap file for `table_id` and registers it.
    pub fn create_table(&self, table_id: TableID, tuple_size: usize) -> Result<Arc<HeapSegment>> {
        let segment = Arc::new(HeapSegment::open(
            table_id,
            &self.files.get_data_file_path(table_id),
            self.config.page_size,
            tuple_size,
        )?);
        self.catalog.add_table(segment.clone());
        Ok(segment)
    }

    /// Replays the log. Register every table first.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let report = self.buffer_manager.log_manager().recover(&self.buffer_manager)?;
        if let Some(max_txn_id) = report.max_txn_id {
            self.transaction_manager.advance_past(max_txn_id);
        }
        Ok(report)
    }

    pub fn begin(&self) -> Result<TransactionID> {
        self.transaction_manager.start_txn()
    }

    pub fn commit(&self, txn: TransactionID) -> Result<()> {
        self.transaction_manager.commit_txn(txn)
    }

    pub fn abort(&self, txn: TransactionID) -> Result<()> {
        self.transaction_manager.abort_txn(txn)
    }

    pub fn insert(&self, txn: TransactionID, table_id: TableID, tuple: &[u8]) -> Result<RecordID> {
        self.buffer_manager.insert_tuple(txn, table_id, tuple)
    }

    pub fn delete(&self, txn: TransactionID, record_id: RecordID) -> Result<()> {
        self.buffer_manager.delete_tuple(txn, record_id)
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.buffer_manager.log_manager().log_checkpoint(&self.buffer_manager)
    }

    /// Writes a final checkpoint. Active transactions stay unfinished in the
    /// log and are rolled back by the next recovery.
    pub fn close(self) -> Result<()> {
        self.buffer_manager.log_manager().shutdown(&self.buffer_manager)?;
        info!("Closed database at {}", self.files.db_directory().display());
        Ok(())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        self.buffer_manager.log_manager()
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        self.buffer_manager.lock_manager()
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }
}
