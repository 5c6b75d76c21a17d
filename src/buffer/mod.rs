mod buffer_manager;
mod page;

pub use buffer_manager::BufferManager;
pub(crate) use buffer_manager::PageCache;
pub use page::{Page, PageImage, PageRef};
