use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::PageID;

/// Location of one tuple: the page holding it and its slot on that page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RecordID {
    pub page_id: PageID,
    pub slot: usize,
}

impl RecordID {
    pub fn new(page_id: PageID, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

impl PartialOrd for RecordID {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordID {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.page_id.cmp(&other.page_id) {
            Ordering::Equal => self.slot.cmp(&other.slot),
            other => other,
        }
    }
}

impl fmt::Display for RecordID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}
