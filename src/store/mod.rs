//! Disk-backed spill storage.
//!
//! [`BufferStore`] owns a private directory tree and turns evicted
//! in-memory buffers into reference-counted [`StoredBuffer`] files. Files
//! are bucketed into numbered subdirectories so no single directory grows
//! unbounded. Dropping the last handle to a buffer deletes its file, and
//! dropping the store deletes the whole tree.

mod blob;

pub use blob::{BlobStore, BlobWriter};

use crate::error::{Error, Result};
use crate::io::{BufferProvider, DataWriter, DynReader, FileReader, FileWriter};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const MAX_CLAIM_ATTEMPTS: u32 = 1024;

/// Raw byte channel feeding a spill file.
pub type WriteChannel = Box<dyn Write + Send>;

/// Raw byte channel draining a spill file.
pub type ReadChannel = Box<dyn Read + Send>;

/// Wraps the raw byte channels under spill files, typically with
/// compression.
///
/// Decoration happens below the engine's framing, so a decorator sees the
/// exact byte stream that would otherwise hit the file.
pub trait ChannelDecorator: Send + Sync {
    /// Called once when the store opens.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Wraps the channel a spill file is written through.
    fn decorate_write(&self, channel: WriteChannel) -> Result<WriteChannel>;

    /// Wraps the channel a spill file is read through.
    fn decorate_read(&self, channel: ReadChannel) -> Result<ReadChannel>;
}

/// Snappy frame compression for spill files.
#[cfg(feature = "snappy")]
pub struct SnappyDecorator;

#[cfg(feature = "snappy")]
impl ChannelDecorator for SnappyDecorator {
    fn decorate_write(&self, channel: WriteChannel) -> Result<WriteChannel> {
        Ok(Box::new(snap::write::FrameEncoder::new(channel)))
    }

    fn decorate_read(&self, channel: ReadChannel) -> Result<ReadChannel> {
        Ok(Box::new(snap::read::FrameDecoder::new(channel)))
    }
}

struct StoreInner {
    root: PathBuf,
    division: u64,
    next_id: AtomicU64,
    decorator: Option<Box<dyn ChannelDecorator>>,
}

impl StoreInner {
    /// Claims the path for file `id`, creating its bucket directory.
    fn file_path(&self, id: u64) -> Result<PathBuf> {
        let bucket = self.root.join(format!("{}", id / self.division));
        fs::create_dir_all(&bucket)?;
        Ok(bucket.join(format!("{}.buf", id)))
    }

    fn decorate_write(&self, channel: WriteChannel) -> Result<WriteChannel> {
        match &self.decorator {
            Some(decorator) => decorator.decorate_write(channel),
            None => Ok(channel),
        }
    }

    fn decorate_read(&self, channel: ReadChannel) -> Result<ReadChannel> {
        match &self.decorator {
            Some(decorator) => decorator.decorate_read(channel),
            None => Ok(channel),
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            log::warn!("Failed to remove spill directory {:?}: {}", self.root, e);
        }
    }
}

/// Store for spilled buffers, rooted in a private directory.
///
/// Cloning is cheap and clones share the directory tree and the file id
/// counter.
#[derive(Clone)]
pub struct BufferStore {
    inner: Arc<StoreInner>,
}

impl BufferStore {
    /// Opens a store under `base` without channel decoration.
    ///
    /// Files are bucketed into subdirectories of `division` files each.
    pub fn new(base: impl AsRef<Path>, division: u64) -> Result<Self> {
        Self::with_decorator(base, division, None)
    }

    /// Opens a store under `base`, wrapping every spill channel with
    /// `decorator`.
    pub fn with_decorator(
        base: impl AsRef<Path>,
        division: u64,
        decorator: Option<Box<dyn ChannelDecorator>>,
    ) -> Result<Self> {
        if division == 0 {
            return Err(Error::invalid_argument("store division must be positive"));
        }
        let base = base.as_ref();
        fs::create_dir_all(base)?;
        let root = Self::claim_root(base)?;
        if let Some(decorator) = &decorator {
            decorator.initialize()?;
        }
        log::info!("Opened spill store at {:?}", root);
        Ok(Self {
            inner: Arc::new(StoreInner {
                root,
                division,
                next_id: AtomicU64::new(0),
                decorator,
            }),
        })
    }

    /// Claims a fresh private subdirectory under `base`.
    fn claim_root(base: &Path) -> Result<PathBuf> {
        let pid = process::id();
        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            let candidate = base.join(format!("spillway-{}-{}", pid, attempt));
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::invalid_state("could not claim a spill directory"))
    }

    /// Root directory this store writes under.
    pub fn path(&self) -> &Path {
        &self.inner.root
    }

    /// Writes `data` as a new spill file and returns its handle.
    pub fn store(&self, data: &[u8]) -> Result<StoredBuffer> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let path = self.inner.file_path(id)?;
        if let Err(e) = self.write_file(&path, data) {
            // Do not leave a truncated file behind.
            if let Err(remove_err) = fs::remove_file(&path) {
                log::warn!("Failed to remove partial spill file {:?}: {}", path, remove_err);
            }
            return Err(e);
        }
        log::debug!("Spilled {} bytes to {:?}", data.len(), path);
        Ok(StoredBuffer {
            inner: Arc::new(StoredInner {
                store: Arc::clone(&self.inner),
                path,
                size: data.len() as u64,
            }),
        })
    }

    /// Opens a [`BlobStore`] writing incrementally into this store's
    /// directory tree.
    pub fn blob_store(&self) -> BlobStore {
        BlobStore::new(Arc::clone(&self.inner))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let file = File::create(path)?;
        let channel = self.inner.decorate_write(Box::new(file))?;
        let mut writer = FileWriter::new(channel);
        writer.write_fully(data)?;
        writer.flush()
    }
}

struct StoredInner {
    // Keeps the directory tree alive while any buffer remains.
    store: Arc<StoreInner>,
    path: PathBuf,
    size: u64,
}

impl Drop for StoredInner {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove spill file {:?}: {}", self.path, e);
        }
    }
}

/// Handle to one spilled buffer on disk.
///
/// Clones share the file; it is deleted when the last clone drops.
#[derive(Clone)]
pub struct StoredBuffer {
    inner: Arc<StoredInner>,
}

impl StoredBuffer {
    /// Uncompressed payload size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Location of the spill file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn from_parts(store: Arc<StoreInner>, path: PathBuf, size: u64) -> Self {
        Self { inner: Arc::new(StoredInner { store, path, size }) }
    }
}

impl BufferProvider for StoredBuffer {
    fn open(&self) -> Result<DynReader> {
        let file = File::open(&self.inner.path)?;
        let channel = self.inner.store.decorate_read(Box::new(file))?;
        Ok(Box::new(FileReader::new(channel)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::DataReader;
    use tempfile::TempDir;

    fn read_all(buffer: &StoredBuffer) -> Vec<u8> {
        let mut reader = buffer.open().unwrap();
        let mut data = vec![0u8; buffer.size() as usize];
        reader.read_fully(&mut data).unwrap();
        data
    }

    #[test]
    fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path(), 1000).unwrap();

        let buffer = store.store(b"hello spill").unwrap();
        assert_eq!(buffer.size(), 11);
        assert_eq!(read_all(&buffer), b"hello spill");
        // A second reader sees the same content.
        assert_eq!(read_all(&buffer), b"hello spill");
    }

    #[test]
    fn test_division_buckets_files() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path(), 2).unwrap();

        let buffers: Vec<_> = (0..5).map(|i| store.store(&[i]).unwrap()).collect();
        for (bucket, expected) in [("0", 2), ("1", 2), ("2", 1)] {
            let count = fs::read_dir(store.path().join(bucket)).unwrap().count();
            assert_eq!(count, expected);
        }
        drop(buffers);
    }

    #[test]
    fn test_buffer_file_removed_on_last_drop() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path(), 1000).unwrap();

        let buffer = store.store(b"transient").unwrap();
        let path = buffer.path().to_path_buf();
        let clone = buffer.clone();
        drop(buffer);
        assert!(path.exists());
        drop(clone);
        assert!(!path.exists());
    }

    #[test]
    fn test_store_tree_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path(), 1000).unwrap();
        let root = store.path().to_path_buf();

        let buffer = store.store(b"data").unwrap();
        drop(store);
        // A live buffer keeps the tree alive.
        assert!(root.exists());
        drop(buffer);
        assert!(!root.exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_stores_claim_distinct_roots() {
        let dir = TempDir::new().unwrap();
        let first = BufferStore::new(dir.path(), 1000).unwrap();
        let second = BufferStore::new(dir.path(), 1000).unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_zero_division_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(BufferStore::new(dir.path(), 0).is_err());
    }

    #[test]
    fn test_empty_buffer() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path(), 1000).unwrap();
        let buffer = store.store(&[]).unwrap();
        assert_eq!(buffer.size(), 0);
        assert_eq!(read_all(&buffer), Vec::<u8>::new());
    }

    #[cfg(feature = "snappy")]
    #[test]
    fn test_snappy_round_trip() {
        let dir = TempDir::new().unwrap();
        let store =
            BufferStore::with_decorator(dir.path(), 1000, Some(Box::new(SnappyDecorator)))
                .unwrap();

        let data = b"abcabcabc".repeat(500);
        let buffer = store.store(&data).unwrap();
        assert_eq!(buffer.size(), data.len() as u64);
        assert_eq!(read_all(&buffer), data);

        let on_disk = fs::metadata(buffer.path()).unwrap().len();
        assert!(on_disk < data.len() as u64);
    }
}
