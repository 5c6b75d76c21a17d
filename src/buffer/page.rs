use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::{PageID, PageKind, TransactionID};

/// Shared handle to a cached page.
pub type PageRef = Arc<RwLock<Page>>;

/// Full byte snapshot of one page, as carried by UPDATE log records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page_id: PageID,
    pub kind: PageKind,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct Page {
    page_id: PageID,
    kind: PageKind,
    data: Vec<u8>,
    dirtied_by: Option<TransactionID>,
    before_image: Vec<u8>,
}

impl Page {
    /// Wraps bytes read from storage. They also become the before-image.
    pub fn new(page_id: PageID, data: Vec<u8>) -> Self {
        Self {
            page_id,
            kind: PageKind::Heap,
            before_image: data.clone(),
            data,
            dirtied_by: None,
        }
    }

    pub fn id(&self) -> PageID {
        self.page_id
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// Records (or clears, with `None`) the transaction that last dirtied the page.
    pub fn mark_dirty(&mut self, txn: Option<TransactionID>) {
        self.dirtied_by = txn;
    }

    pub fn is_dirty(&self) -> Option<TransactionID> {
        self.dirtied_by
    }

    pub fn image(&self) -> PageImage {
        PageImage {
            page_id: self.page_id,
            kind: self.kind,
            data: self.data.clone(),
        }
    }

    pub fn before_image(&self) -> PageImage {
        PageImage {
            page_id: self.page_id,
            kind: self.kind,
            data: self.before_image.clone(),
        }
    }

    /// Takes the current contents as the new baseline for rollback.
    pub fn set_before_image(&mut self) {
        self.before_image = self.data.clone();
    }
}
