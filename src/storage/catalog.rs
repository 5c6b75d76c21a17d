use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::DbFile;
use crate::buffer::PageImage;
use crate::common::{Result, TableID, TxStoreError};

/// Maps table ids to the files that store them.
#[derive(Default)]
pub struct Catalog {
    files: RwLock<HashMap<TableID, Arc<dyn DbFile>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under its own table id, replacing any earlier entry.
    pub fn add_table(&self, file: Arc<dyn DbFile>) {
        self.files.write().insert(file.table_id(), file);
    }

    pub fn get_database_file(&self, table_id: TableID) -> Result<Arc<dyn DbFile>> {
        self.files
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(TxStoreError::UnknownTable(table_id))
    }

    pub fn table_ids(&self) -> Vec<TableID> {
        let mut ids: Vec<TableID> = self.files.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Writes a logged page image straight to its table's file.
    pub fn write_image(&self, image: &PageImage) -> Result<()> {
        self.get_database_file(image.page_id.table_id)?
            .write_page(image.page_id, &image.data)
    }

    pub fn sync_all(&self) -> Result<()> {
        let files: Vec<Arc<dyn DbFile>> = self.files.read().values().cloned().collect();
        for file in files {
            file.sync()?;
        }
        Ok(())
    }
}
