//! Local-filesystem-backed [`RangeReader`] and file handle pool.
//!
//! Every container consumed by this crate (`.ets`, `.tif`) lives on local
//! disk. Blocking `seek`+`read` calls are
//! dispatched through [`tokio::task::spawn_blocking`] so they never occupy
//! an async worker thread, mirroring the boundary the block-caching layer
//! uses to keep blocking calls off the executor.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::{Mutex, Semaphore};

use super::RangeReader;
use crate::error::IoError;

/// A [`RangeReader`] over a single local file.
///
/// Cheaply cloneable: the underlying handle is behind an `Arc`, and reads
/// are serialized per-clone by re-opening a fresh positioned read for each
/// call rather than sharing a single cursor.
#[derive(Clone)]
pub struct LocalFileReader {
    path: Arc<PathBuf>,
    size: u64,
    identifier: Arc<str>,
}

impl LocalFileReader {
    /// Open `path` and cache its size.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let identifier: Arc<str> = Arc::from(path.to_string_lossy().into_owned());
        let path_for_meta = path.clone();
        let size = tokio::task::spawn_blocking(move || std::fs::metadata(&path_for_meta).map(|m| m.len()))
            .await
            .map_err(|e| IoError::Read(e.to_string()))??;

        Ok(Self {
            path: Arc::new(path),
            size,
            identifier,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RangeReader for LocalFileReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset + len as u64 > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = File::open(path.as_path())?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = BytesMut::zeroed(len);
            file.read_exact(&mut buf)?;
            Ok(buf.freeze())
        })
        .await
        .map_err(|e| IoError::Read(e.to_string()))?
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// An elastic pool of open file handles to a single container file.
///
/// Each decode checks out a handle, performs a `seek`+`read`, and returns
/// it. The pool grows lazily up to `max` handles; once at capacity,
/// checkout blocks until a handle is returned.
///
/// Always held behind an `Arc` so a checked-out [`PooledHandle`] can return
/// itself to the pool from a spawned task on drop without borrowing.
pub struct HandlePool {
    path: Arc<PathBuf>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<File>>,
}

impl HandlePool {
    /// Create a pool for `path` that allows up to `max` concurrently
    /// checked-out handles.
    pub fn new(path: impl AsRef<Path>, max: usize) -> Arc<Self> {
        Arc::new(Self {
            path: Arc::new(path.as_ref().to_path_buf()),
            semaphore: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Check out a handle, blocking until one is available.
    pub async fn checkout(self: &Arc<Self>) -> Result<PooledHandle, IoError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("handle pool semaphore closed");

        let file = {
            let mut idle = self.idle.lock().await;
            idle.pop()
        };

        let file = match file {
            Some(f) => f,
            None => {
                let path = self.path.clone();
                tokio::task::spawn_blocking(move || File::open(path.as_path()))
                    .await
                    .map_err(|e| IoError::Read(e.to_string()))??
            }
        };

        Ok(PooledHandle {
            pool: self.clone(),
            file: Some(file),
            _permit: permit,
        })
    }

    async fn release(&self, file: File) {
        self.idle.lock().await.push(file);
    }

    /// Check out a handle, read exactly `len` bytes at `offset`, and return
    /// the handle to the pool. Convenience wrapper around [`Self::checkout`]
    /// for callers that only need a single read.
    pub async fn read_exact_at(self: &Arc<Self>, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let mut handle = self.checkout().await?;
        tokio::task::spawn_blocking(move || {
            let data = handle.read_exact_at(offset, len)?;
            Ok::<_, std::io::Error>(Bytes::from(data))
        })
        .await
        .map_err(|e| IoError::Read(e.to_string()))?
        .map_err(IoError::from)
    }
}

/// RAII handle returned by [`HandlePool::checkout`]; returns itself to the
/// pool on drop.
pub struct PooledHandle {
    pool: Arc<HandlePool>,
    file: Option<File>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl PooledHandle {
    /// Seek to `offset` and read exactly `len` bytes.
    pub fn read_exact_at(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let file = self.file.as_mut().expect("handle taken");
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.release(file).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn write_temp(data: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("olympus-wsi-test-{}", uuid_like()));
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn uuid_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }

    #[tokio::test]
    async fn reads_exact_range() {
        let data: Vec<u8> = (0..=255u8).collect();
        let path = write_temp(&data).await;

        let reader = LocalFileReader::open(&path).await.unwrap();
        assert_eq!(reader.size(), 256);

        let slice = reader.read_exact_at(10, 20).await.unwrap();
        assert_eq!(&slice[..], &data[10..30]);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn rejects_out_of_bounds() {
        let path = write_temp(&[1, 2, 3, 4]).await;
        let reader = LocalFileReader::open(&path).await.unwrap();

        let result = reader.read_exact_at(2, 10).await;
        assert!(matches!(result, Err(IoError::RangeOutOfBounds { .. })));

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn handle_pool_checkout_and_release() {
        let data: Vec<u8> = (0..100u8).collect();
        let path = write_temp(&data).await;

        let pool = HandlePool::new(&path, 2);
        {
            let mut h1 = pool.checkout().await.unwrap();
            let bytes = h1.read_exact_at(0, 10).unwrap();
            assert_eq!(&bytes[..], &data[0..10]);
        }
        // Handle released, second checkout should not block.
        let mut h2 = pool.checkout().await.unwrap();
        let bytes = h2.read_exact_at(50, 10).unwrap();
        assert_eq!(&bytes[..], &data[50..60]);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn handle_pool_async_read_exact_at() {
        let data: Vec<u8> = (0..100u8).collect();
        let path = write_temp(&data).await;

        let pool = HandlePool::new(&path, 2);
        let bytes = pool.read_exact_at(20, 10).await.unwrap();
        assert_eq!(&bytes[..], &data[20..30]);

        std::fs::remove_file(&path).ok();
    }
}
