//! Chunk-addressed source reading.
//!
//! Original uploads are stored as numbered parts 1..N. The source reader
//! presents them as one logical byte stream: it keeps a single open part
//! handle, switches to the next part as each one drains, and can map a
//! logical offset into the concatenated original onto a (part, offset)
//! pair.

use std::path::PathBuf;
use std::sync::Arc;

use vodvault_common::{layout, ReqSeq, UserId};
use vodvault_db::models::FileChunk;
use vodvault_storage::{AsyncStorage, OpenFlags, StorageError, StorageFile};

/// Map a logical byte offset into the concatenated original onto the
/// 1-based part number holding it and the offset within that part.
///
/// `start_idx` is the 1-based part the walk begins at (its preceding
/// parts are assumed already skipped). Offsets past the end yield `None`.
pub fn estimate_chunk_index(
    parts_size: &[u64],
    start_idx: usize,
    mut pos: u64,
) -> Option<(usize, u64)> {
    if start_idx == 0 || start_idx > parts_size.len() {
        return None;
    }
    for (i, &size) in parts_size.iter().enumerate().skip(start_idx - 1) {
        if pos < size {
            return Some((i + 1, pos));
        }
        pos -= size;
    }
    None
}

/// Sequential reader over the uploaded parts of one request.
pub struct ChunkSource {
    storage: Arc<dyn AsyncStorage>,
    usr_id: UserId,
    req_seq: ReqSeq,
    parts_size: Vec<u64>,
    open: Option<OpenPart>,
    /// 1-based number of the next part to open.
    next_part: usize,
    done: bool,
}

struct OpenPart {
    part: usize,
    file: Box<dyn StorageFile>,
    pos: u64,
}

impl ChunkSource {
    pub fn new(
        storage: Arc<dyn AsyncStorage>,
        usr_id: UserId,
        req_seq: ReqSeq,
        chunks: &[FileChunk],
    ) -> Self {
        Self {
            storage,
            usr_id,
            req_seq,
            parts_size: chunks.iter().map(|c| c.size_bytes).collect(),
            open: None,
            next_part: 1,
            done: chunks.is_empty(),
        }
    }

    /// Total size of the concatenated original.
    pub fn total_size(&self) -> u64 {
        self.parts_size.iter().sum()
    }

    pub fn parts_size(&self) -> &[u64] {
        &self.parts_size
    }

    /// True once every part has been read to its end.
    pub fn has_done(&self) -> bool {
        self.done
    }

    fn part_path(&self, part: usize) -> PathBuf {
        layout::chunk_file(self.usr_id, self.req_seq, part as u16)
    }

    /// Close the currently open part and open `part` (or the next one in
    /// sequence when `None`), preserving the single-open-handle rule.
    pub async fn switch_chunk(&mut self, part: Option<usize>) -> Result<(), StorageError> {
        if let Some(open) = self.open.take() {
            open.file.close().await?;
        }
        let part = part.unwrap_or(self.next_part);
        if part == 0 || part > self.parts_size.len() {
            return Err(StorageError::arg(format!(
                "part {part} out of range 1..={}",
                self.parts_size.len()
            )));
        }
        let file = self
            .storage
            .open(&self.part_path(part), OpenFlags::read_only())
            .await?;
        self.open = Some(OpenPart { part, file, pos: 0 });
        self.next_part = part + 1;
        self.done = false;
        Ok(())
    }

    /// Read the next bytes of the logical stream. Returns 0 once all
    /// parts are exhausted.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize, StorageError> {
        loop {
            if self.done {
                return Ok(0);
            }
            if self.open.is_none() {
                if self.next_part > self.parts_size.len() {
                    self.done = true;
                    return Ok(0);
                }
                self.switch_chunk(None).await?;
            }
            let open = self.open.as_mut().expect("part opened above");
            let n = open.file.read_at(Some(open.pos), dst).await?;
            if n > 0 {
                open.pos += n as u64;
                return Ok(n);
            }
            // current part drained; advance
            let finished = self.open.take().expect("open part present");
            finished.file.close().await?;
            if self.next_part > self.parts_size.len() {
                self.done = true;
                return Ok(0);
            }
        }
    }

    /// Position the reader at a logical offset into the concatenated
    /// original.
    pub async fn seek_to(&mut self, offset: u64) -> Result<(), StorageError> {
        let (part, within) = estimate_chunk_index(&self.parts_size, 1, offset)
            .ok_or_else(|| StorageError::arg(format!("offset {offset} past end of source")))?;
        self.switch_chunk(Some(part)).await?;
        if let Some(open) = self.open.as_mut() {
            open.pos = within;
        }
        Ok(())
    }

    /// Close any open handle.
    pub async fn close(&mut self) -> Result<(), StorageError> {
        if let Some(open) = self.open.take() {
            open.file.close().await?;
        }
        Ok(())
    }
}
