mod error;
pub use error::*;

mod tid;
pub use tid::RecordID;

mod config;
pub use config::{DatabaseConfig, DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES};

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TableID(pub u32);

impl fmt::Display for TableID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TransactionID(pub u64);

impl fmt::Display for TransactionID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A page is named by its table and its position in that table's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PageID {
    pub table_id: TableID,
    pub page_no: u32,
}

impl PageID {
    pub fn new(table_id: u32, page_no: u32) -> Self {
        Self {
            table_id: TableID(table_id),
            page_no,
        }
    }

    pub fn kind(&self) -> PageIdKind {
        PageIdKind::TablePage
    }

    /// Integer fields written to the log for this id.
    pub fn fields(&self) -> Vec<i32> {
        vec![self.table_id.0 as i32, self.page_no as i32]
    }

    pub fn from_fields(kind: PageIdKind, fields: &[i32]) -> Result<Self> {
        match (kind, fields) {
            (PageIdKind::TablePage, [table_id, page_no]) => {
                Ok(PageID::new(*table_id as u32, *page_no as u32))
            }
            _ => Err(TxStoreError::LogCorrupted(format!(
                "{:?} page id expects 2 fields, found {}",
                kind,
                fields.len()
            ))),
        }
    }
}

impl fmt::Display for PageID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.table_id.0, self.page_no)
    }
}

/// Storage layout of a page, recorded with every logged page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PageKind {
    Heap = 1,
}

impl TryFrom<i32> for PageKind {
    type Error = TxStoreError;

    fn try_from(tag: i32) -> Result<Self> {
        match tag {
            1 => Ok(PageKind::Heap),
            _ => Err(TxStoreError::LogCorrupted(format!("unknown page kind tag {}", tag))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PageIdKind {
    TablePage = 1,
}

impl TryFrom<i32> for PageIdKind {
    type Error = TxStoreError;

    fn try_from(tag: i32) -> Result<Self> {
        match tag {
            1 => Ok(PageIdKind::TablePage),
            _ => Err(TxStoreError::LogCorrupted(format!("unknown page id tag {}", tag))),
        }
    }
}

/// Access a transaction asks for when fetching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}
