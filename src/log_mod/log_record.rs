//! Binary layout of the write-ahead log.
//!
//! The file starts with one `i64`: the offset of the last checkpoint record,
//! or `-1`. Records follow back to back:
//!
//! ```text
//! [type: i32][txn: i64] payload [start: i64]
//! ```
//!
//! `start` repeats the offset of the record's own first byte so the log can
//! be walked backwards. UPDATE carries a before and an after page image,
//! each `[page kind: i32][id kind: i32][field count: i32][fields: i32..]
//! [length: i32][bytes]`. CHECKPOINT carries `[count: i32]` then `count`
//! pairs of `[txn: i64][first record offset: i64]`. All integers are
//! big-endian.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::buffer::PageImage;
use crate::common::{PageID, PageIdKind, PageKind, Result, TransactionID, TxStoreError};

pub const NO_CHECKPOINT: i64 = -1;
pub const HEADER_SIZE: u64 = 8;

const NO_TRANSACTION: i64 = -1;
const MAX_IMAGE_BYTES: i32 = 1 << 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LogRecordType {
    AbortRecord = 1,
    CommitRecord = 2,
    UpdateRecord = 3,
    BeginRecord = 4,
    CheckpointRecord = 5,
}

impl TryFrom<i32> for LogRecordType {
    type Error = TxStoreError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            1 => Ok(LogRecordType::AbortRecord),
            2 => Ok(LogRecordType::CommitRecord),
            3 => Ok(LogRecordType::UpdateRecord),
            4 => Ok(LogRecordType::BeginRecord),
            5 => Ok(LogRecordType::CheckpointRecord),
            _ => Err(TxStoreError::LogCorrupted(format!(
                "invalid log record type {}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Begin(TransactionID),
    Commit(TransactionID),
    Abort(TransactionID),
    Update {
        txn: TransactionID,
        before: PageImage,
        after: PageImage,
    },
    /// Transactions live at checkpoint time with the offset of their first record.
    Checkpoint { active: Vec<(TransactionID, u64)> },
}

/// A decoded record and the offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub offset: u64,
    pub record: LogRecord,
}

impl LogRecord {
    pub fn record_type(&self) -> LogRecordType {
        match self {
            LogRecord::Begin(_) => LogRecordType::BeginRecord,
            LogRecord::Commit(_) => LogRecordType::CommitRecord,
            LogRecord::Abort(_) => LogRecordType::AbortRecord,
            LogRecord::Update { .. } => LogRecordType::UpdateRecord,
            LogRecord::Checkpoint { .. } => LogRecordType::CheckpointRecord,
        }
    }

    pub fn txn_id(&self) -> Option<TransactionID> {
        match self {
            LogRecord::Begin(txn) | LogRecord::Commit(txn) | LogRecord::Abort(txn) => Some(*txn),
            LogRecord::Update { txn, .. } => Some(*txn),
            LogRecord::Checkpoint { .. } => None,
        }
    }

    /// Size of the encoded record, trailing offset included.
    pub fn encoded_len(&self) -> u64 {
        let payload = match self {
            LogRecord::Update { before, after, .. } => image_len(before) + image_len(after),
            LogRecord::Checkpoint { active } => 4 + 16 * active.len() as u64,
            _ => 0,
        };
        4 + 8 + payload + 8
    }

    /// Encodes the record as it sits at offset `start`.
    pub fn encode(&self, start: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        buf.write_i32::<BigEndian>(self.record_type() as i32)?;
        let txn = self.txn_id().map_or(NO_TRANSACTION, |t| t.0 as i64);
        buf.write_i64::<BigEndian>(txn)?;

        match self {
            LogRecord::Update { before, after, .. } => {
                write_page_image(&mut buf, before)?;
                write_page_image(&mut buf, after)?;
            }
            LogRecord::Checkpoint { active } => {
                buf.write_i32::<BigEndian>(active.len() as i32)?;
                for (txn, first) in active {
                    buf.write_i64::<BigEndian>(txn.0 as i64)?;
                    buf.write_i64::<BigEndian>(*first as i64)?;
                }
            }
            _ => {}
        }

        buf.write_i64::<BigEndian>(start as i64)?;
        Ok(buf)
    }

    /// Reads one record. Returns it together with its trailing start offset,
    /// which the caller checks against the position it read from.
    pub fn decode<R: Read>(reader: &mut R) -> Result<(LogRecord, u64)> {
        let record_type = LogRecordType::try_from(reader.read_i32::<BigEndian>()?)?;
        let raw_txn = reader.read_i64::<BigEndian>()?;
        let txn = || -> Result<TransactionID> {
            if raw_txn < 0 {
                return Err(TxStoreError::LogCorrupted(format!(
                    "{:?} with transaction id {}",
                    record_type, raw_txn
                )));
            }
            Ok(TransactionID(raw_txn as u64))
        };

        let record = match record_type {
            LogRecordType::BeginRecord => LogRecord::Begin(txn()?),
            LogRecordType::CommitRecord => LogRecord::Commit(txn()?),
            LogRecordType::AbortRecord => LogRecord::Abort(txn()?),
            LogRecordType::UpdateRecord => {
                let txn = txn()?;
                let before = read_page_image(reader)?;
                let after = read_page_image(reader)?;
                LogRecord::Update { txn, before, after }
            }
            LogRecordType::CheckpointRecord => {
                let count = reader.read_i32::<BigEndian>()?;
                if count < 0 {
                    return Err(TxStoreError::LogCorrupted(format!(
                        "checkpoint with {} transactions",
                        count
                    )));
                }
                let mut active = Vec::with_capacity((count as usize).min(1024));
                for _ in 0..count {
                    let txn = reader.read_i64::<BigEndian>()?;
                    let first = reader.read_i64::<BigEndian>()?;
                    active.push((TransactionID(txn as u64), first as u64));
                }
                LogRecord::Checkpoint { active }
            }
        };

        let start = reader.read_i64::<BigEndian>()?;
        Ok((record, start as u64))
    }
}

fn image_len(image: &PageImage) -> u64 {
    let fields = image.page_id.fields().len() as u64;
    4 + 4 + 4 + 4 * fields + 4 + image.data.len() as u64
}

pub fn write_page_image<W: Write>(writer: &mut W, image: &PageImage) -> io::Result<()> {
    writer.write_i32::<BigEndian>(image.kind as i32)?;
    writer.write_i32::<BigEndian>(image.page_id.kind() as i32)?;
    let fields = image.page_id.fields();
    writer.write_i32::<BigEndian>(fields.len() as i32)?;
    for field in fields {
        writer.write_i32::<BigEndian>(field)?;
    }
    writer.write_i32::<BigEndian>(image.data.len() as i32)?;
    writer.write_all(&image.data)
}

pub fn read_page_image<R: Read>(reader: &mut R) -> Result<PageImage> {
    let kind = PageKind::try_from(reader.read_i32::<BigEndian>()?)?;
    let id_kind = PageIdKind::try_from(reader.read_i32::<BigEndian>()?)?;

    let field_count = reader.read_i32::<BigEndian>()?;
    if !(0..=16).contains(&field_count) {
        return Err(TxStoreError::LogCorrupted(format!(
            "page id with {} fields",
            field_count
        )));
    }
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(reader.read_i32::<BigEndian>()?);
    }
    let page_id = PageID::from_fields(id_kind, &fields)?;

    let length = reader.read_i32::<BigEndian>()?;
    if !(0..=MAX_IMAGE_BYTES).contains(&length) {
        return Err(TxStoreError::LogCorrupted(format!(
            "page image of {} bytes",
            length
        )));
    }
    let mut data = vec![0u8; length as usize];
    reader.read_exact(&mut data)?;

    Ok(PageImage { page_id, kind, data })
}
