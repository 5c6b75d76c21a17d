mod log_manager;
mod log_record;

pub(crate) use log_manager::LogFile;
pub use log_manager::{LogManager, RecoveryReport};
pub use log_record::{
    read_page_image, write_page_image, LogEntry, LogRecord, LogRecordType, HEADER_SIZE,
    NO_CHECKPOINT,
};
