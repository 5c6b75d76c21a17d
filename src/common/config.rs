use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_POOL_PAGES: usize = 50;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub page_size: usize,
    pub buffer_pool_pages: usize,
    /// Upper bound on how long a lock request may block before aborting.
    pub lock_timeout: Duration,
    /// Longest single sleep between re-checks of a blocked lock request.
    pub lock_poll_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_pages: DEFAULT_POOL_PAGES,
            lock_timeout: Duration::from_secs(20),
            lock_poll_interval: Duration::from_millis(20),
        }
    }
}

impl DatabaseConfig {
    // Only tests should shrink pages; the log and heap files assume one size per database.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_buffer_pool_pages(mut self, pages: usize) -> Self {
        self.buffer_pool_pages = pages;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }
}
