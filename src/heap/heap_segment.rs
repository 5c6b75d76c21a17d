use std::path::Path;

use log::debug;
use parking_lot::Mutex;

use crate::buffer::{BufferManager, PageRef};
use crate::common::{PageID, Permissions, RecordID, Result, TableID, TransactionID, TxStoreError};
use crate::storage::{DbFile, File, FileMode, MemoryFile, PosixFile, SlottedPage};

/// A table stored as a run of fixed-size slotted pages.
///
/// Page `n` lives at byte offset `n * page_size`. Pages are only read and
/// modified through the buffer pool; the segment itself writes directly
/// only when it appends a fresh empty page.
pub struct HeapSegment {
    table_id: TableID,
    file: Mutex<Box<dyn File>>,
    page_size: usize,
    tuple_size: usize,
    slots_per_page: usize,
}

impl HeapSegment {
    pub fn open(table_id: TableID, path: &Path, page_size: usize, tuple_size: usize) -> Result<Self> {
        let file = PosixFile::new(path, FileMode::WRITE)?;
        Ok(Self::with_file(table_id, Box::new(file), page_size, tuple_size))
    }

    pub fn in_memory(table_id: TableID, page_size: usize, tuple_size: usize) -> Self {
        Self::with_file(
            table_id,
            Box::new(MemoryFile::new(FileMode::WRITE)),
            page_size,
            tuple_size,
        )
    }

    /// Backed by an anonymous file that disappears when the segment is dropped.
    pub fn temporary(table_id: TableID, page_size: usize, tuple_size: usize) -> Result<Self> {
        let file = PosixFile::make_temporary()?;
        Ok(Self::with_file(table_id, Box::new(file), page_size, tuple_size))
    }

    pub fn with_file(
        table_id: TableID,
        file: Box<dyn File>,
        page_size: usize,
        tuple_size: usize,
    ) -> Self {
        Self {
            table_id,
            file: Mutex::new(file),
            page_size,
            tuple_size,
            slots_per_page: SlottedPage::slots_per_page(page_size, tuple_size),
        }
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn slots_per_page(&self) -> usize {
        self.slots_per_page
    }

    /// Appends one empty page to the file and returns its id.
    pub fn allocate_page(&self) -> Result<PageID> {
        let empty = SlottedPage::new(self.slots_per_page).encode(self.page_size)?;
        let mut file = self.file.lock();
        let page_no = file.len()? / self.page_size as u64;
        file.write_at(page_no * self.page_size as u64, &empty)?;

        let page_id = PageID::new(self.table_id.0, page_no as u32);
        debug!("Allocated page {}", page_id);
        Ok(page_id)
    }

    pub fn decode_page(&self, data: &[u8]) -> Result<SlottedPage> {
        SlottedPage::decode(data, self.slots_per_page)
    }

    /// Reads one tuple under a shared lock.
    pub fn get_tuple(
        &self,
        txn: TransactionID,
        record_id: RecordID,
        pool: &BufferManager,
    ) -> Result<Vec<u8>> {
        let page = pool.fetch_page(txn, record_id.page_id, Permissions::ReadOnly)?;
        let guard = page.read();
        let body = self.decode_page(guard.get_data())?;
        Ok(body.get(record_id.slot)?.to_vec())
    }

    /// Every tuple in the table, read under shared locks.
    pub fn scan(&self, txn: TransactionID, pool: &BufferManager) -> Result<Vec<(RecordID, Vec<u8>)>> {
        let mut tuples = Vec::new();
        for page_no in 0..self.num_pages()? {
            let page_id = PageID::new(self.table_id.0, page_no);
            let page = pool.fetch_page(txn, page_id, Permissions::ReadOnly)?;
            let body = {
                let guard = page.read();
                self.decode_page(guard.get_data())?
            };
            tuples.extend(
                body.tuples()
                    .map(|(slot, tuple)| (RecordID::new(page_id, slot), tuple.to_vec())),
            );
        }
        Ok(tuples)
    }

    fn offset_of(&self, page_id: PageID) -> u64 {
        page_id.page_no as u64 * self.page_size as u64
    }

    fn try_insert(&self, page: &PageRef, tuple: &[u8]) -> Result<Option<usize>> {
        let mut page = page.write();
        let mut body = self.decode_page(page.get_data())?;
        match body.insert(tuple) {
            Some(slot) => {
                page.set_data(body.encode(self.page_size)?);
                Ok(Some(slot))
            }
            None => Ok(None),
        }
    }
}

impl DbFile for HeapSegment {
    fn table_id(&self) -> TableID {
        self.table_id
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, page_id: PageID) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        let offset = self.offset_of(page_id);
        if offset + self.page_size as u64 > file.len()? {
            return Err(TxStoreError::PageNotFound(page_id));
        }
        let mut data = vec![0u8; self.page_size];
        file.read_at(offset, &mut data)?;
        Ok(data)
    }

    fn write_page(&self, page_id: PageID, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(TxStoreError::Other(format!(
                "Page {} is {} bytes, expected {}",
                page_id,
                data.len(),
                self.page_size
            )));
        }
        let offset = self.offset_of(page_id);
        self.file.lock().write_at(offset, data)
    }

    fn num_pages(&self) -> Result<u32> {
        Ok((self.file.lock().len()? / self.page_size as u64) as u32)
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync()
    }

    fn insert_tuple(
        &self,
        txn: TransactionID,
        tuple: &[u8],
        pool: &BufferManager,
    ) -> Result<(RecordID, Vec<PageRef>)> {
        if tuple.len() > self.tuple_size {
            return Err(TxStoreError::TupleTooLarge(tuple.len(), self.tuple_size));
        }
        if self.slots_per_page == 0 {
            return Err(TxStoreError::TupleTooLarge(self.tuple_size, self.page_size));
        }

        for page_no in 0..self.num_pages()? {
            let page_id = PageID::new(self.table_id.0, page_no);
            let page = pool.fetch_page(txn, page_id, Permissions::ReadWrite)?;
            if let Some(slot) = self.try_insert(&page, tuple)? {
                return Ok((RecordID::new(page_id, slot), vec![page]));
            }
        }

        let page_id = self.allocate_page()?;
        let page = pool.fetch_page(txn, page_id, Permissions::ReadWrite)?;
        match self.try_insert(&page, tuple)? {
            Some(slot) => Ok((RecordID::new(page_id, slot), vec![page])),
            None => Err(TxStoreError::Other(format!(
                "No free slot on freshly allocated page {}",
                page_id
            ))),
        }
    }

    fn delete_tuple(
        &self,
        txn: TransactionID,
        record_id: RecordID,
        pool: &BufferManager,
    ) -> Result<Vec<PageRef>> {
        if record_id.page_id.table_id != self.table_id {
            return Err(TxStoreError::PageNotFound(record_id.page_id));
        }
        let page = pool.fetch_page(txn, record_id.page_id, Permissions::ReadWrite)?;
        {
            let mut guard = page.write();
            let mut body = self.decode_page(guard.get_data())?;
            body.delete(record_id.slot)?;
            guard.set_data(body.encode(self.page_size)?);
        }
        Ok(vec![page])
    }
}
