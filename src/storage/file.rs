use std::fs::{File as StdFile, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use uuid::Uuid;

use crate::common::{Result, TxStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    READ,
    WRITE,
}

/// Byte-addressed storage under a heap segment, on disk or in memory.
///
/// Every access names its offset; nothing relies on a current position.
pub trait File: Send {
    fn mode(&self) -> FileMode;

    fn len(&self) -> Result<u64>;

    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Fills `buf` from `offset`. Reading past the end is an error.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` at `offset`, growing the file if needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    fn sync(&mut self) -> Result<()>;
}

fn ensure_writable(mode: FileMode) -> Result<()> {
    match mode {
        FileMode::WRITE => Ok(()),
        FileMode::READ => Err(TxStoreError::IOError(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "file opened read-only",
        ))),
    }
}

fn check_range(offset: u64, wanted: usize, len: u64) -> Result<()> {
    if offset + wanted as u64 > len {
        return Err(TxStoreError::IOError(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{} bytes at {} run past the end ({})", wanted, offset, len),
        )));
    }
    Ok(())
}

pub struct PosixFile {
    mode: FileMode,
    file: StdFile,
}

impl PosixFile {
    pub fn new(path: &Path, mode: FileMode) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == FileMode::WRITE)
            .create(mode == FileMode::WRITE)
            .open(path)?;
        Ok(Self { mode, file })
    }

    /// A scratch file in the system temp directory. Its name is unlinked
    /// at once, so the data lives exactly as long as the handle.
    pub fn make_temporary() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("txstore-{}.tmp", Uuid::new_v4()));
        let file = Self::new(&path, FileMode::WRITE)?;
        std::fs::remove_file(&path)?;
        Ok(file)
    }
}

impl File for PosixFile {
    fn mode(&self) -> FileMode {
        self.mode
    }

    // Asked of the OS each time: other handles may have grown the file.
    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        ensure_writable(self.mode)?;
        self.file.set_len(len)?;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len()?)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        ensure_writable(self.mode)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Heap-backed stand-in for tests that never touch the disk.
pub struct MemoryFile {
    mode: FileMode,
    bytes: Vec<u8>,
}

impl MemoryFile {
    pub fn new(mode: FileMode) -> Self {
        Self::from_bytes(Vec::new(), mode)
    }

    pub fn from_bytes(bytes: Vec<u8>, mode: FileMode) -> Self {
        Self { mode, bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl File for MemoryFile {
    fn mode(&self) -> FileMode {
        self.mode
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        ensure_writable(self.mode)?;
        self.bytes.resize(len as usize, 0);
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len()?)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        ensure_writable(self.mode)?;
        let start = offset as usize;
        if start + data.len() > self.bytes.len() {
            self.bytes.resize(start + data.len(), 0);
        }
        self.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
