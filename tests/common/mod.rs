#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use txstore::{
    common::Result, BufferManager, Catalog, DatabaseConfig, HeapSegment, LockManager, LogManager,
    PageID, TableID,
};

pub const TABLE: TableID = TableID(1);
pub const PAGE_SIZE: usize = 256;
pub const TUPLE_SIZE: usize = 16;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config(pool_pages: usize) -> DatabaseConfig {
    DatabaseConfig::default()
        .with_page_size(PAGE_SIZE)
        .with_buffer_pool_pages(pool_pages)
        .with_lock_timeout(Duration::from_secs(5))
        .with_lock_poll_interval(Duration::from_millis(5))
}

pub fn page(page_no: u32) -> PageID {
    PageID::new(TABLE.0, page_no)
}

/// A pool wired to one on-disk heap table and a log, all under a temp dir.
pub struct Fixture {
    pub dir: TempDir,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub log_manager: Arc<LogManager>,
    pub pool: Arc<BufferManager>,
    pub table: Arc<HeapSegment>,
}

impl Fixture {
    pub fn new(pool_pages: usize) -> Result<Self> {
        Self::with_config(test_config(pool_pages))
    }

    pub fn with_config(config: DatabaseConfig) -> Result<Self> {
        init_logging();
        let dir = tempfile::tempdir()?;
        Self::open(dir, config)
    }

    /// Reopens every component over the files already in `dir`.
    pub fn open(dir: TempDir, config: DatabaseConfig) -> Result<Self> {
        let catalog = Arc::new(Catalog::new());
        let table = Arc::new(HeapSegment::open(
            TABLE,
            &dir.path().join("table.dat"),
            config.page_size,
            TUPLE_SIZE,
        )?);
        catalog.add_table(table.clone());

        let lock_manager = Arc::new(LockManager::from_config(&config));
        let log_manager = Arc::new(LogManager::new(&log_path(dir.path()))?);
        let pool = Arc::new(BufferManager::new(
            &config,
            Arc::clone(&lock_manager),
            Arc::clone(&log_manager),
            Arc::clone(&catalog),
        ));

        Ok(Self {
            dir,
            catalog,
            lock_manager,
            log_manager,
            pool,
            table,
        })
    }

    /// Appends `n` empty pages to the table.
    pub fn allocate(&self, n: u32) -> Result<Vec<PageID>> {
        (0..n).map(|_| self.table.allocate_page()).collect()
    }

    /// Drops every in-memory component as a crash would, keeping the files.
    pub fn crash(self) -> TempDir {
        self.dir
    }
}

pub fn log_path(dir: &Path) -> std::path::PathBuf {
    dir.join("wal.log")
}

/// A page body full of `byte`, sized for the test page size.
pub fn filled(byte: u8) -> Vec<u8> {
    vec![byte; PAGE_SIZE]
}
