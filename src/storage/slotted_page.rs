use crate::common::{Result, TxStoreError};
use serde_derive::{Deserialize, Serialize};

// bincode's fixed-int layout: an 8-byte slot count, then per slot a 1-byte
// Option tag and an 8-byte length ahead of the tuple bytes.
const VEC_HEADER: usize = 8;
const SLOT_OVERHEAD: usize = 1 + 8;

/// Body of a heap page: a fixed number of tuple slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlottedPage {
    pub slots: Vec<Option<Vec<u8>>>,
}

impl SlottedPage {
    pub fn new(num_slots: usize) -> Self {
        Self {
            slots: vec![None; num_slots],
        }
    }

    /// How many tuples of up to `tuple_size` bytes fit in one page.
    pub fn slots_per_page(page_size: usize, tuple_size: usize) -> usize {
        page_size.saturating_sub(VEC_HEADER) / (tuple_size + SLOT_OVERHEAD)
    }

    /// Decodes a page body. A zero-filled page decodes as all-empty.
    pub fn decode(data: &[u8], num_slots: usize) -> Result<Self> {
        let mut page: SlottedPage =
            bincode::deserialize(data).map_err(|_| TxStoreError::DeserializationError)?;
        if page.slots.len() > num_slots {
            return Err(TxStoreError::DeserializationError);
        }
        page.slots.resize(num_slots, None);
        Ok(page)
    }

    /// Encodes and zero-pads to exactly `page_size` bytes.
    pub fn encode(&self, page_size: usize) -> Result<Vec<u8>> {
        let mut bytes =
            bincode::serialize(self).map_err(|e| TxStoreError::Other(e.to_string()))?;
        if bytes.len() > page_size {
            return Err(TxStoreError::PageSizeExceeded(bytes.len(), page_size));
        }
        bytes.resize(page_size, 0);
        Ok(bytes)
    }

    pub fn insert(&mut self, tuple: &[u8]) -> Option<usize> {
        // First free slot wins
        let index = self.slots.iter().position(|slot| slot.is_none())?;
        self.slots[index] = Some(tuple.to_vec());
        Some(index)
    }

    pub fn delete(&mut self, slot_index: usize) -> Result<()> {
        match self.slots.get_mut(slot_index) {
            None => Err(TxStoreError::InvalidSlotIndex(slot_index)),
            Some(slot) if slot.is_none() => Err(TxStoreError::EmptySlot(slot_index)),
            Some(slot) => {
                *slot = None;
                Ok(())
            }
        }
    }

    pub fn get(&self, slot_index: usize) -> Result<&[u8]> {
        match self.slots.get(slot_index) {
            None => Err(TxStoreError::InvalidSlotIndex(slot_index)),
            Some(None) => Err(TxStoreError::EmptySlot(slot_index)),
            Some(Some(tuple)) => Ok(tuple),
        }
    }

    pub fn empty_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    pub fn tuples(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_deref().map(|t| (i, t)))
    }
}
