//! Random-access device boundary.
//!
//! The core edits executables through a byte-addressable reader/writer
//! pair rather than touching the filesystem directly. `FileDevice` is
//! the on-disk implementation; `MemDevice` backs a plain byte vector
//! and is mainly useful for exercising the codecs without touching
//! disk.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::infra::error::{EditError, EditResult};

/// Positioned reads. `read_at` must return exactly `len` bytes; a short
/// read is an [`EditError::Io`].
pub trait ReadAt {
    fn read_at(&mut self, pos: u64, len: usize) -> EditResult<Vec<u8>>;
}

/// Positioned writes. `write_at` must write the whole buffer.
pub trait WriteAt {
    fn write_at(&mut self, pos: u64, data: &[u8]) -> EditResult<()>;
}

/// Random-access view of a file on disk.
pub struct FileDevice {
    file: File,
}

impl FileDevice {
    /// Open a file for reading only.
    pub fn open(path: &Path) -> EditResult<Self> {
        let file = File::open(path)
            .map_err(|e| EditError::Io(format!("failed to open {}: {e}", path.display())))?;
        Ok(Self { file })
    }

    /// Open a file for reading and writing.
    pub fn open_rw(path: &Path) -> EditResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| EditError::Io(format!("failed to open {}: {e}", path.display())))?;
        Ok(Self { file })
    }

    /// Flush pending writes and release the handle.
    pub fn close(self) -> EditResult<()> {
        self.file
            .sync_all()
            .map_err(|e| EditError::Io(format!("failed to flush file: {e}")))
    }
}

impl ReadAt for FileDevice {
    fn read_at(&mut self, pos: u64, len: usize) -> EditResult<Vec<u8>> {
        self.file.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf).map_err(|e| {
            EditError::Io(format!("short read of {len} bytes at offset {pos}: {e}"))
        })?;
        Ok(buf)
    }
}

impl WriteAt for FileDevice {
    fn write_at(&mut self, pos: u64, data: &[u8]) -> EditResult<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(data).map_err(|e| {
            EditError::Io(format!(
                "short write of {} bytes at offset {pos}: {e}",
                data.len()
            ))
        })?;
        Ok(())
    }
}

/// In-memory device over a byte vector. Writes past the end grow the
/// buffer.
#[derive(Debug, Default, Clone)]
pub struct MemDevice {
    bytes: Vec<u8>,
}

impl MemDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl ReadAt for MemDevice {
    fn read_at(&mut self, pos: u64, len: usize) -> EditResult<Vec<u8>> {
        let start = usize::try_from(pos)
            .map_err(|_| EditError::Io(format!("read offset {pos} out of range")))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| EditError::Io(format!("short read of {len} bytes at offset {pos}")))?;
        Ok(self.bytes[start..end].to_vec())
    }
}

impl WriteAt for MemDevice {
    fn write_at(&mut self, pos: u64, data: &[u8]) -> EditResult<()> {
        let start = usize::try_from(pos)
            .map_err(|_| EditError::Io(format!("write offset {pos} out of range")))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| EditError::Io(format!("write offset {pos} out of range")))?;
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(data);
        Ok(())
    }
}
