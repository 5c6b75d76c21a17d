mod catalog;
mod db_file;
mod db_files;
mod file;
mod slotted_page;

pub use catalog::Catalog;
pub use db_file::DbFile;
pub use db_files::DBFiles;
pub use file::{File, FileMode, MemoryFile, PosixFile};
pub use slotted_page::SlottedPage;
