//! Device handles.
//!
//! A [`Device`] wraps a block device or plain file opened for the lifetime
//! of one session. The source opens it read-only, the target read-write.
//! The handle tracks its cursor so block reads and in-place rewrites can be
//! checked against the block they belong to.

use crate::block::Block;
use crate::error::{Error, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// How a device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// An open device with a known size and cursor.
#[derive(Debug)]
pub struct Device {
    path: PathBuf,
    file: File,
    size: u64,
    mode: AccessMode,
    position: u64,
}

impl Device {
    /// Open `path` and determine its size by seeking to the end.
    ///
    /// Seeking works for both regular files and block devices, where file
    /// metadata reports a length of zero.
    pub async fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(mode == AccessMode::ReadWrite)
            .open(&path)
            .await
            .map_err(|e| Error::device(&path, e))?;

        let size = file
            .seek(SeekFrom::End(0))
            .await
            .map_err(|e| Error::device(&path, e))?;
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| Error::device(&path, e))?;

        tracing::debug!("Opened {} ({:?}, {} bytes)", path.display(), mode, size);

        Ok(Self {
            path,
            file,
            size,
            mode,
            position: 0,
        })
    }

    pub async fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, AccessMode::ReadOnly).await
    }

    pub async fn open_read_write(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, AccessMode::ReadWrite).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read exactly `block.len` bytes at the cursor into `buf`.
    ///
    /// Blocks must be read in order: the cursor has to sit at `block.offset`.
    /// On return the cursor is at `block.end()`.
    pub async fn read_block(&mut self, block: &Block, buf: &mut Vec<u8>) -> Result<()> {
        if self.position != block.offset {
            return Err(self.cursor_error(block.offset));
        }
        buf.resize(block.len, 0);
        self.file
            .read_exact(buf)
            .await
            .map_err(|e| Error::device(&self.path, e))?;
        self.position = block.end();
        Ok(())
    }

    /// Overwrite the block that was just read with `data`.
    ///
    /// Steps the cursor back by `block.len` and writes in place, so only
    /// that block's byte range is touched. The cursor ends at `block.end()`.
    pub async fn rewrite_block(&mut self, block: &Block, data: &[u8]) -> Result<()> {
        if self.mode != AccessMode::ReadWrite {
            return Err(Error::device(
                &self.path,
                std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "device opened read-only",
                ),
            ));
        }
        if data.len() != block.len {
            return Err(Error::Framing(format!(
                "patch for block {} is {} bytes, expected {}",
                block.index,
                data.len(),
                block.len
            )));
        }
        if self.position != block.end() {
            return Err(self.cursor_error(block.end()));
        }

        let back = -(block.len as i64);
        let pos = self
            .file
            .seek(SeekFrom::Current(back))
            .await
            .map_err(|e| Error::device(&self.path, e))?;
        debug_assert_eq!(pos, block.offset);
        self.file
            .write_all(data)
            .await
            .map_err(|e| Error::device(&self.path, e))?;
        self.position = block.end();
        Ok(())
    }

    /// Flush written data to stable storage.
    pub async fn sync(&mut self) -> Result<()> {
        if self.mode == AccessMode::ReadWrite {
            self.file
                .flush()
                .await
                .map_err(|e| Error::device(&self.path, e))?;
            self.file
                .sync_all()
                .await
                .map_err(|e| Error::device(&self.path, e))?;
        }
        Ok(())
    }

    fn cursor_error(&self, expected: u64) -> Error {
        Error::device(
            &self.path,
            std::io::Error::other(format!(
                "cursor at {} but block expects {}",
                self.position, expected
            )),
        )
    }
}
