//! Local filesystem backend.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Result, StorageError};
use crate::{confine, AsyncStorage, Dirent, EntryType, OpenFlags, ScanCursor, StorageFile};

/// Storage backend over a directory tree on the local filesystem.
pub struct LocalFsStorage {
    base_path: PathBuf,
}

impl LocalFsStorage {
    /// Create a backend rooted at `base_path`. The directory is created if
    /// it does not exist yet.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }
}

#[derive(Debug)]
struct LocalFile {
    file: fs::File,
    pos: u64,
}

#[async_trait]
impl StorageFile for LocalFile {
    async fn read_at(&mut self, offset: Option<u64>, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Err(StorageError::arg("read buffer must be non-empty"));
        }
        let start = match offset {
            Some(o) => {
                self.file.seek(SeekFrom::Start(o)).await?;
                o
            }
            None => self.pos,
        };
        let nread = self.file.read(dst).await?;
        self.pos = start + nread as u64;
        Ok(nread)
    }

    async fn write_at(&mut self, offset: Option<u64>, src: &[u8]) -> Result<usize> {
        if src.is_empty() {
            return Err(StorageError::arg("write buffer must be non-empty"));
        }
        let start = match offset {
            Some(o) => {
                self.file.seek(SeekFrom::Start(o)).await?;
                o
            }
            None => self.pos,
        };
        self.file.write_all(src).await?;
        self.pos = start + src.len() as u64;
        Ok(src.len())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl AsyncStorage for LocalFsStorage {
    fn base_path(&self) -> &Path {
        &self.base_path
    }

    async fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn StorageFile>> {
        let full = confine(&self.base_path, path)?;
        if !flags.read && !flags.write {
            return Err(StorageError::arg("open needs read or write access"));
        }
        let file = fs::OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .create(flags.create)
            .truncate(flags.truncate)
            .open(&full)
            .await?;
        Ok(Box::new(LocalFile { file, pos: 0 }))
    }

    async fn mkdir(
        &self,
        origin: &Path,
        prefix: Option<&Path>,
        allow_exists: bool,
    ) -> Result<PathBuf> {
        let mut curr_parent = match prefix {
            Some(p) => confine(&self.base_path, p)?,
            None => self.base_path.clone(),
        };
        let mut relative = prefix.map(Path::to_path_buf).unwrap_or_default();

        let tokens: Vec<&str> = origin
            .to_str()
            .ok_or_else(|| StorageError::arg("mkdir path is not valid UTF-8"))?
            .split('/')
            .collect();
        if tokens.is_empty() {
            return Err(StorageError::arg("mkdir path is empty"));
        }
        let last = tokens.len() - 1;
        for (idx, tok) in tokens.iter().enumerate() {
            if tok.is_empty() || *tok == "." || *tok == ".." {
                return Err(StorageError::arg(format!(
                    "forbidden path token in mkdir: {tok:?}"
                )));
            }
            curr_parent.push(tok);
            relative.push(tok);
            match fs::create_dir(&curr_parent).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    // intermediate components may exist; the final one only
                    // when the caller tolerates it
                    if idx == last && !allow_exists {
                        return Err(StorageError::Os(e));
                    }
                }
                Err(e) => return Err(StorageError::Os(e)),
            }
        }
        Ok(relative)
    }

    async fn rmdir(&self, path: &Path) -> Result<()> {
        let full = confine(&self.base_path, path)?;
        fs::remove_dir(&full).await?;
        Ok(())
    }

    async fn scandir(&self, path: &Path) -> Result<ScanCursor> {
        let full = confine(&self.base_path, path)?;
        let mut rd = fs::read_dir(&full).await?;
        let mut entries = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let file_type = entry.file_type().await?;
            let entry_type = if file_type.is_dir() {
                EntryType::Dir
            } else if file_type.is_file() {
                EntryType::File
            } else if file_type.is_symlink() {
                EntryType::Link
            } else {
                EntryType::Unknown
            };
            entries.push(Dirent {
                name: entry.file_name().to_string_lossy().into_owned(),
                entry_type,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ScanCursor::new(entries))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_full = confine(&self.base_path, from)?;
        let to_full = confine(&self.base_path, to)?;
        fs::rename(&from_full, &to_full).await?;
        Ok(())
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        let full = confine(&self.base_path, path)?;
        fs::remove_file(&full).await?;
        Ok(())
    }
}
