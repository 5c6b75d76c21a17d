use crate::buffer::{BufferManager, PageRef};
use crate::common::{PageID, RecordID, Result, TableID, TransactionID};

/// Storage behind one table: fixed-size page I/O plus the tuple-level
/// mutations the buffer pool delegates to it.
///
/// `read_page` and `write_page` must address pages by byte offset so that
/// concurrent writes to different pages of the same file never overlap.
pub trait DbFile: Send + Sync {
    fn table_id(&self) -> TableID;

    fn page_size(&self) -> usize;

    fn read_page(&self, page_id: PageID) -> Result<Vec<u8>>;

    fn write_page(&self, page_id: PageID, data: &[u8]) -> Result<()>;

    fn num_pages(&self) -> Result<u32>;

    /// Makes every completed `write_page` durable.
    fn sync(&self) -> Result<()>;

    /// Places `tuple` on some page, fetching pages through `pool` with write
    /// access. Returns where it landed and every page it modified.
    fn insert_tuple(
        &self,
        txn: TransactionID,
        tuple: &[u8],
        pool: &BufferManager,
    ) -> Result<(RecordID, Vec<PageRef>)>;

    fn delete_tuple(
        &self,
        txn: TransactionID,
        record_id: RecordID,
        pool: &BufferManager,
    ) -> Result<Vec<PageRef>>;
}
