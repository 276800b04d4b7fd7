//! Incremental spill file creation.
//!
//! A [`BlobWriter`] streams bytes straight into a store file instead of
//! spilling a complete in-memory buffer. On commit the file becomes a
//! regular [`StoredBuffer`]; an abandoned writer deletes its file.

use super::{StoreInner, StoredBuffer};
use crate::error::{Error, Result};
use crate::io::{DataWriter, FileWriter};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Creates spill files incrementally within a [`BufferStore`]'s directory
/// tree.
///
/// [`BufferStore`]: super::BufferStore
#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<StoreInner>,
}

impl BlobStore {
    pub(super) fn new(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    /// Opens a writer for a new blob.
    pub fn create(&self) -> Result<BlobWriter> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let path = self.inner.file_path(id)?;
        let file = File::create(&path)?;
        let channel = self.inner.decorate_write(Box::new(file))?;
        Ok(BlobWriter {
            writer: Some(FileWriter::new(channel)),
            store: Arc::clone(&self.inner),
            path,
            committed: false,
        })
    }
}

/// Streams one blob into the store.
///
/// Writes pass through the store's channel decoration like any spilled
/// buffer. Call [`BlobWriter::commit`] to keep the file; dropping the
/// writer without committing deletes it.
pub struct BlobWriter {
    writer: Option<FileWriter>,
    store: Arc<StoreInner>,
    path: PathBuf,
    committed: bool,
}

impl BlobWriter {
    /// Logical bytes written so far, before any channel decoration.
    pub fn size(&self) -> u64 {
        self.writer.as_ref().map_or(0, FileWriter::bytes_written)
    }

    /// Location of the blob file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seals the blob and returns its buffer handle.
    pub fn commit(mut self) -> Result<StoredBuffer> {
        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => return Err(Error::invalid_state("blob writer already committed")),
        };
        writer.flush()?;
        let size = writer.bytes_written();
        drop(writer);
        self.committed = true;
        Ok(StoredBuffer::from_parts(
            Arc::clone(&self.store),
            self.path.clone(),
            size,
        ))
    }

    fn writer_mut(&mut self) -> Result<&mut FileWriter> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::invalid_state("blob writer already committed"))
    }
}

impl DataWriter for BlobWriter {
    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.writer_mut()?.write_i32(value)
    }

    fn write_fully(&mut self, buf: &[u8]) -> Result<()> {
        self.writer_mut()?.write_fully(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer_mut()?.flush()
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.writer.take();
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove abandoned blob {:?}: {}", self.path, e);
        }
    }
}
