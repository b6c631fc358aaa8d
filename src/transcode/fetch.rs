//! Non-stream fetch processor.
//!
//! Reads one committed file and hands its bytes out chunk by chunk; the
//! response driver forwards each chunk as a body frame.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use vodvault_storage::{AsyncStorage, OpenFlags, StorageError, StorageFile};

/// Sequential reader over one committed file.
pub struct FileFetchProcessor {
    storage: Arc<dyn AsyncStorage>,
    path: PathBuf,
    file: Option<Box<dyn StorageFile>>,
    read_buf: usize,
    eof: bool,
}

impl FileFetchProcessor {
    pub fn new(storage: Arc<dyn AsyncStorage>, path: PathBuf, read_buf: usize) -> Self {
        Self {
            storage,
            path,
            file: None,
            read_buf: read_buf.max(1),
            eof: false,
        }
    }

    /// Open the target file. Fails with the storage error (not-found maps
    /// to 404 upstream).
    pub async fn init(&mut self) -> Result<(), StorageError> {
        let file = self.storage.open(&self.path, OpenFlags::read_only()).await?;
        self.file = Some(file);
        Ok(())
    }

    /// Next body chunk, or `None` at EOF.
    pub async fn read_next(&mut self) -> Result<Option<Bytes>, StorageError> {
        if self.eof {
            return Ok(None);
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::arg("fetch processor not initialized"))?;
        let mut buf = vec![0u8; self.read_buf];
        let n = file.read_at(None, &mut buf).await?;
        if n == 0 {
            self.eof = true;
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    pub fn eof_reached(&self) -> bool {
        self.eof
    }

    pub async fn deinit(&mut self) -> Result<(), StorageError> {
        if let Some(file) = self.file.take() {
            file.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use vodvault_storage::{write_all, LocalFsStorage};

    #[tokio::test]
    async fn test_fetch_reads_whole_file_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn AsyncStorage> =
            Arc::new(LocalFsStorage::new(dir.path()).unwrap());
        let payload: Vec<u8> = (0..700u32).map(|n| (n % 256) as u8).collect();
        write_all(storage.as_ref(), Path::new("blob"), &payload)
            .await
            .unwrap();

        let mut fetch = FileFetchProcessor::new(storage, PathBuf::from("blob"), 256);
        fetch.init().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = fetch.read_next().await.unwrap() {
            assert!(chunk.len() <= 256);
            collected.extend_from_slice(&chunk);
        }
        assert!(fetch.eof_reached());
        assert_eq!(collected, payload);
        fetch.deinit().await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_missing_file_fails_at_init() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn AsyncStorage> =
            Arc::new(LocalFsStorage::new(dir.path()).unwrap());
        let mut fetch = FileFetchProcessor::new(storage, PathBuf::from("ghost"), 256);
        assert!(fetch.init().await.unwrap_err().is_not_found());
    }
}
