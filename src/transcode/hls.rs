//! HLS transcode destination.
//!
//! The destination drives a filter→encode→write loop over the source
//! bytes: the filter and encoder are trait seams (real codecs sit behind
//! them; the built-in pair is a passthrough filter and a size-based
//! segmenter). Closed segments accumulate on local scratch and are
//! flushed to remote storage while the in-flight segment stays local; the
//! newest segment is only transferred once the source reports done.
//!
//! The processing loop is re-entrant: each call advances one step. When
//! the source drains, the filter is switched to its flush variant, then
//! the encoder, then the playlists and metadata are written and the whole
//! version moves from `transcoding/` to `committed/`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use vodvault_common::report::section;
use vodvault_common::{layout, Error, ErrorReport, Result};
use vodvault_media::keystore::{KeyStore, VersionMetadata};
use vodvault_storage::{
    read_to_vec, write_all, AsyncStorage, OpenFlags, StorageError, StorageFile,
};

use crate::config::TranscodeConfig;
use crate::transcode::removal::remove_tree;
use crate::transcode::{FileProcessor, ProcessingState, StorageMap, TranscodeJobSpec};

/// Output of one encoder step.
#[derive(Debug, PartialEq, Eq)]
pub enum SegmentEvent {
    /// The initialization map is complete.
    InitMap(Vec<u8>),
    /// Bytes belonging to the current segment.
    Data(Vec<u8>),
    /// The current segment is complete; close its file.
    CutSegment,
}

/// Byte-stream filter stage.
pub trait AvFilter: Send + Sync {
    fn filter(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()>;
    /// Drain internal state once the source is exhausted.
    fn flush(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

/// Encoder stage producing segment events.
pub trait AvEncoder: Send + Sync {
    fn encode(&mut self, input: &[u8], out: &mut Vec<SegmentEvent>) -> Result<()>;
    /// Close the trailing segment once the filter has drained.
    fn flush(&mut self, out: &mut Vec<SegmentEvent>) -> Result<()>;
}

/// Filter that moves bytes through unchanged.
pub struct PassthroughFilter;

impl AvFilter for PassthroughFilter {
    fn filter(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(input);
        Ok(())
    }

    fn flush(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// Encoder that captures the stream head as the init map and cuts
/// segments at a target byte size.
pub struct SegmentCutter {
    init_map_bytes: usize,
    segment_bytes: u64,
    init_buf: Vec<u8>,
    init_done: bool,
    current_bytes: u64,
}

impl SegmentCutter {
    pub fn new(init_map_bytes: usize, segment_bytes: u64) -> Self {
        Self {
            init_map_bytes,
            segment_bytes: segment_bytes.max(1),
            init_buf: Vec::with_capacity(init_map_bytes),
            init_done: false,
            current_bytes: 0,
        }
    }
}

impl AvEncoder for SegmentCutter {
    fn encode(&mut self, input: &[u8], out: &mut Vec<SegmentEvent>) -> Result<()> {
        let mut input = input;
        if !self.init_done {
            let need = self.init_map_bytes - self.init_buf.len();
            let take = need.min(input.len());
            self.init_buf.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.init_buf.len() == self.init_map_bytes {
                out.push(SegmentEvent::InitMap(std::mem::take(&mut self.init_buf)));
                self.init_done = true;
            }
        }
        while !input.is_empty() {
            let room = (self.segment_bytes - self.current_bytes) as usize;
            let take = room.min(input.len());
            out.push(SegmentEvent::Data(input[..take].to_vec()));
            self.current_bytes += take as u64;
            input = &input[take..];
            if self.current_bytes == self.segment_bytes {
                out.push(SegmentEvent::CutSegment);
                self.current_bytes = 0;
            }
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut Vec<SegmentEvent>) -> Result<()> {
        if !self.init_done {
            out.push(SegmentEvent::InitMap(std::mem::take(&mut self.init_buf)));
            self.init_done = true;
        }
        if self.current_bytes > 0 {
            out.push(SegmentEvent::CutSegment);
            self.current_bytes = 0;
        }
        Ok(())
    }
}

/// Copies closed segments and metadata from local scratch to remote
/// storage, recomputing a SHA-1 per file during the transfer.
pub struct SegmentFlusher {
    local: Arc<dyn AsyncStorage>,
    remote: Arc<dyn AsyncStorage>,
    local_dir: PathBuf,
    remote_dir: PathBuf,
    copy_buf: usize,
    manifest: BTreeMap<String, String>,
}

impl SegmentFlusher {
    pub fn new(
        local: Arc<dyn AsyncStorage>,
        remote: Arc<dyn AsyncStorage>,
        local_dir: PathBuf,
        remote_dir: PathBuf,
        copy_buf: usize,
    ) -> Self {
        Self {
            local,
            remote,
            local_dir,
            remote_dir,
            copy_buf: copy_buf.max(1),
            manifest: BTreeMap::new(),
        }
    }

    /// Transfer every closed segment below the newest one; with
    /// `include_latest` the newest segment and the non-segment files
    /// (init map, playlists, metadata) go too. Returns how many files
    /// moved.
    pub async fn try_flush(&mut self, include_latest: bool) -> std::result::Result<usize, StorageError> {
        let mut cursor = match self.local.scandir(&self.local_dir).await {
            Ok(cursor) => cursor,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut segments: Vec<u32> = Vec::new();
        let mut others: Vec<String> = Vec::new();
        while let Some(entry) = cursor.next() {
            match layout::parse_segment_filename(&entry.name) {
                Some(idx) => segments.push(idx),
                None => others.push(entry.name.clone()),
            }
        }
        segments.sort_unstable();
        let latest = segments.last().copied();

        let mut transferred = 0usize;
        for idx in segments {
            if !include_latest && Some(idx) == latest {
                // the newest segment might still be open
                continue;
            }
            self.transfer(&layout::segment_filename(idx)).await?;
            transferred += 1;
        }
        // init map and playlists travel with whichever pass finds them
        for name in others {
            self.transfer(&name).await?;
            transferred += 1;
        }
        Ok(transferred)
    }

    async fn transfer(&mut self, name: &str) -> std::result::Result<(), StorageError> {
        let src_path = self.local_dir.join(name);
        let dst_path = self.remote_dir.join(name);
        let mut src = self.local.open(&src_path, OpenFlags::read_only()).await?;
        let mut dst = self.remote.open(&dst_path, OpenFlags::write_create()).await?;
        let mut digest = Sha1::new();
        let mut buf = vec![0u8; self.copy_buf];
        loop {
            let n = src.read_at(None, &mut buf).await?;
            if n == 0 {
                break;
            }
            digest.update(&buf[..n]);
            dst.write_at(None, &buf[..n]).await?;
        }
        src.close().await?;
        dst.close().await?;
        self.local.unlink(&src_path).await?;
        self.manifest.insert(name.to_string(), hex::encode(digest.finalize()));
        Ok(())
    }

    /// Write the digest manifest next to the transferred files.
    pub async fn write_manifest(&self) -> std::result::Result<(), StorageError> {
        let body = serde_json::to_vec(&self.manifest)
            .map_err(|e| StorageError::data(format!("manifest serialization: {e}")))?;
        write_all(
            self.remote.as_ref(),
            &self.remote_dir.join(layout::FLUSH_MANIFEST_FILENAME),
            &body,
        )
        .await
    }

    pub fn manifest(&self) -> &BTreeMap<String, String> {
        &self.manifest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Normal,
    FlushFilter,
    FlushEncoder,
    FinalWrite,
    MoveToStorage,
    Done,
}

/// Destination processor producing one encrypted-streamable HLS version.
pub struct HlsTranscodeProcessor {
    job: TranscodeJobSpec,
    map: StorageMap,
    filter: Box<dyn AvFilter>,
    encoder: Box<dyn AvEncoder>,
    flusher: SegmentFlusher,
    cfg: TranscodeConfig,
    phase: Phase,
    seg_file: Option<Box<dyn StorageFile>>,
    seg_index: u32,
    seg_sizes: Vec<u64>,
    current_seg_bytes: u64,
    key_id: Option<String>,
    report: ErrorReport,
    deinit_done: bool,
}

impl HlsTranscodeProcessor {
    pub fn new(job: TranscodeJobSpec, map: StorageMap, cfg: TranscodeConfig) -> Self {
        let local_dir = PathBuf::from(job.version.as_str());
        let remote_dir = layout::transcoding_dir(job.usr_id, job.req_seq, &job.version);
        let flusher = SegmentFlusher::new(
            map.local.clone(),
            map.remote.clone(),
            local_dir,
            remote_dir,
            cfg.read_buf_bytes,
        );
        Self {
            filter: Box::new(PassthroughFilter),
            encoder: Box::new(SegmentCutter::new(cfg.init_map_bytes, cfg.segment_bytes)),
            flusher,
            cfg,
            phase: Phase::Normal,
            seg_file: None,
            seg_index: 0,
            seg_sizes: Vec::new(),
            current_seg_bytes: 0,
            key_id: None,
            report: ErrorReport::new(),
            deinit_done: false,
            job,
            map,
        }
    }

    fn local_dir(&self) -> PathBuf {
        PathBuf::from(self.job.version.as_str())
    }

    fn remote_dir(&self) -> PathBuf {
        layout::transcoding_dir(self.job.usr_id, self.job.req_seq, &self.job.version)
    }

    fn storage_failure(&mut self, what: &str, e: StorageError) -> Error {
        let msg = format!("{what}: {e}");
        self.report.set(section::STORAGE, msg.clone());
        Error::internal(msg)
    }

    /// Ensure the per-request key store holds an entry for this run and
    /// remember its id.
    async fn ensure_crypto_key(&mut self) -> Result<()> {
        let path = layout::crypto_key_file(self.job.usr_id, self.job.req_seq);
        let mut store = match read_to_vec(self.map.remote.as_ref(), &path, self.cfg.read_buf_bytes)
            .await
        {
            Ok(bytes) => KeyStore::from_json(&bytes)
                .map_err(|e| Error::internal(format!("corrupt crypto key store: {e}")))?,
            Err(e) if e.is_not_found() => KeyStore::new(),
            Err(e) => return Err(self.storage_failure("crypto key store read", e)),
        };
        let key_id = store.generate(&mut rand::thread_rng());
        let body = store
            .to_json()
            .map_err(|e| Error::internal(format!("crypto key store serialization: {e}")))?;
        write_all(self.map.remote.as_ref(), &path, &body)
            .await
            .map_err(|e| self.storage_failure("crypto key store write", e))?;
        self.key_id = Some(key_id);
        Ok(())
    }

    async fn open_segment(&mut self) -> Result<()> {
        if self.seg_file.is_some() {
            return Ok(());
        }
        let path = self.local_dir().join(layout::segment_filename(self.seg_index));
        let file = self
            .map
            .local
            .open(&path, OpenFlags::write_create())
            .await
            .map_err(|e| self.storage_failure("segment open", e))?;
        self.seg_file = Some(file);
        self.current_seg_bytes = 0;
        Ok(())
    }

    async fn apply_events(&mut self, events: Vec<SegmentEvent>) -> Result<()> {
        let mut cut_any = false;
        for event in events {
            match event {
                SegmentEvent::InitMap(bytes) => {
                    let path = self.local_dir().join(layout::INIT_MAP_FILENAME);
                    write_all(self.map.local.as_ref(), &path, &bytes)
                        .await
                        .map_err(|e| self.storage_failure("init map write", e))?;
                }
                SegmentEvent::Data(bytes) => {
                    self.open_segment().await?;
                    let file = self.seg_file.as_mut().expect("segment opened above");
                    file.write_at(None, &bytes)
                        .await
                        .map_err(|e| self.storage_failure("segment write", e))?;
                    self.current_seg_bytes += bytes.len() as u64;
                }
                SegmentEvent::CutSegment => {
                    if let Some(file) = self.seg_file.take() {
                        file.close()
                            .await
                            .map_err(|e| self.storage_failure("segment close", e))?;
                        self.seg_sizes.push(self.current_seg_bytes);
                        self.seg_index += 1;
                        self.current_seg_bytes = 0;
                        cut_any = true;
                    }
                }
            }
        }
        if cut_any {
            // opportunistic flush; the newest segment is withheld
            self.flusher
                .try_flush(false)
                .await
                .map_err(|e| self.storage_failure("segment flush", e))?;
        }
        Ok(())
    }

    fn segment_duration(&self, size: u64) -> f64 {
        let full = self.cfg.nominal_segment_secs;
        if size >= self.cfg.segment_bytes {
            full
        } else {
            full * size as f64 / self.cfg.segment_bytes as f64
        }
    }

    fn render_media_playlist(&self) -> String {
        let mut out = String::new();
        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:7").unwrap();
        writeln!(
            out,
            "#EXT-X-TARGETDURATION:{}",
            self.cfg.nominal_segment_secs.ceil() as u32
        )
        .unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:0").unwrap();
        writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD").unwrap();
        writeln!(out, "#EXT-X-MAP:URI=\"{}\"", layout::INIT_MAP_FILENAME).unwrap();
        for (idx, &size) in self.seg_sizes.iter().enumerate() {
            writeln!(out, "#EXTINF:{:.6},", self.segment_duration(size)).unwrap();
            writeln!(out, "{}", layout::segment_filename(idx as u32)).unwrap();
        }
        writeln!(out, "#EXT-X-ENDLIST").unwrap();
        out
    }

    fn render_master_fragment(&self) -> String {
        let total_bytes: u64 = self.seg_sizes.iter().sum();
        let duration: f64 = self
            .seg_sizes
            .iter()
            .map(|&s| self.segment_duration(s))
            .sum();
        let bandwidth = if duration > 0.0 {
            (total_bytes as f64 * 8.0 / duration) as u64
        } else {
            0
        };
        let mut out = String::new();
        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:7").unwrap();
        writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
            bandwidth, self.job.width, self.job.height
        )
        .unwrap();
        writeln!(out, "{}", layout::MEDIA_PLAYLIST_FILENAME).unwrap();
        out
    }

    async fn final_write(&mut self) -> Result<()> {
        let key_id = self
            .key_id
            .clone()
            .ok_or_else(|| Error::internal("crypto key id missing at final write"))?;
        let metadata = VersionMetadata { key_id };
        let meta_body = serde_json::to_vec(&metadata)
            .map_err(|e| Error::internal(format!("metadata serialization: {e}")))?;
        let dir = self.local_dir();
        write_all(
            self.map.local.as_ref(),
            &dir.join(layout::VERSION_METADATA_FILENAME),
            &meta_body,
        )
        .await
        .map_err(|e| self.storage_failure("metadata write", e))?;
        let media = self.render_media_playlist();
        write_all(
            self.map.local.as_ref(),
            &dir.join(layout::MEDIA_PLAYLIST_FILENAME),
            media.as_bytes(),
        )
        .await
        .map_err(|e| self.storage_failure("media playlist write", e))?;
        let master = self.render_master_fragment();
        write_all(
            self.map.local.as_ref(),
            &dir.join(layout::MASTER_PLAYLIST_FILENAME),
            master.as_bytes(),
        )
        .await
        .map_err(|e| self.storage_failure("master playlist write", e))?;
        Ok(())
    }

    async fn remote_dir_exists(&self, dir: &PathBuf) -> bool {
        self.map.remote.scandir(dir).await.is_ok()
    }

    /// Promote `transcoding/<ver>` to `committed/<ver>`, parking any
    /// previous committed version in `discarding/` and purging it.
    async fn commit_version(&mut self) -> Result<()> {
        let usr = self.job.usr_id;
        let seq = self.job.req_seq;
        let ver = self.job.version.clone();
        let committed = layout::committed_dir(usr, seq, &ver);
        let discarding = layout::discarding_dir(usr, seq, &ver);

        self.map
            .remote
            .mkdir(
                &layout::committed_root(usr, seq),
                None,
                true,
            )
            .await
            .map_err(|e| self.storage_failure("committed root mkdir", e))?;

        if self.remote_dir_exists(&committed).await {
            self.map
                .remote
                .mkdir(&layout::discarding_root(usr, seq), None, true)
                .await
                .map_err(|e| self.storage_failure("discarding root mkdir", e))?;
            if self.remote_dir_exists(&discarding).await {
                remove_tree(&self.map.remote, &discarding)
                    .await
                    .map_err(|e| self.storage_failure("stale tombstone removal", e))?;
            }
            self.map
                .remote
                .rename(&committed, &discarding)
                .await
                .map_err(|e| self.storage_failure("previous version park", e))?;
            remove_tree(&self.map.remote, &discarding)
                .await
                .map_err(|e| self.storage_failure("previous version purge", e))?;
        }
        self.map
            .remote
            .rename(&self.remote_dir(), &committed)
            .await
            .map_err(|e| self.storage_failure("version promotion", e))?;
        Ok(())
    }
}

#[async_trait]
impl FileProcessor for HlsTranscodeProcessor {
    async fn init(&mut self) -> Result<()> {
        self.map
            .remote
            .mkdir(&self.remote_dir(), None, true)
            .await
            .map_err(|e| self.storage_failure("transcoding dir mkdir", e))?;
        self.map
            .local
            .mkdir(&self.local_dir(), None, true)
            .await
            .map_err(|e| self.storage_failure("scratch dir mkdir", e))?;
        self.ensure_crypto_key().await?;
        Ok(())
    }

    async fn processing(&mut self) -> Result<ProcessingState> {
        match self.phase {
            Phase::Normal => {
                let mut buf = vec![0u8; self.cfg.read_buf_bytes];
                let n = self
                    .map
                    .source
                    .read(&mut buf)
                    .await
                    .map_err(|e| self.storage_failure("source read", e))?;
                if n == 0 {
                    // the source is exhausted; switch the filter to its
                    // flush variant on the next pass
                    self.phase = Phase::FlushFilter;
                    return Ok(ProcessingState::InProgress);
                }
                let mut filtered = Vec::with_capacity(n);
                self.filter.filter(&buf[..n], &mut filtered)?;
                let mut events = Vec::new();
                self.encoder.encode(&filtered, &mut events)?;
                self.apply_events(events).await?;
                Ok(ProcessingState::InProgress)
            }
            Phase::FlushFilter => {
                let mut filtered = Vec::new();
                self.filter.flush(&mut filtered)?;
                let mut events = Vec::new();
                self.encoder.encode(&filtered, &mut events)?;
                self.apply_events(events).await?;
                self.phase = Phase::FlushEncoder;
                Ok(ProcessingState::InProgress)
            }
            Phase::FlushEncoder => {
                let mut events = Vec::new();
                self.encoder.flush(&mut events)?;
                self.apply_events(events).await?;
                self.phase = Phase::FinalWrite;
                Ok(ProcessingState::InProgress)
            }
            Phase::FinalWrite => {
                self.final_write().await?;
                self.phase = Phase::MoveToStorage;
                Ok(ProcessingState::InProgress)
            }
            Phase::MoveToStorage => {
                self.flusher
                    .try_flush(true)
                    .await
                    .map_err(|e| self.storage_failure("final flush", e))?;
                self.flusher
                    .write_manifest()
                    .await
                    .map_err(|e| self.storage_failure("manifest write", e))?;
                self.commit_version().await?;
                self.phase = Phase::Done;
                Ok(ProcessingState::Done)
            }
            Phase::Done => Ok(ProcessingState::Done),
        }
    }

    fn has_done_processing(&self) -> bool {
        self.phase == Phase::Done
    }

    async fn deinit(&mut self) -> Result<()> {
        if self.deinit_done {
            return Ok(());
        }
        self.deinit_done = true;
        if let Err(e) = self.map.source.close().await {
            tracing::warn!("source close during deinit: {e}");
        }
        if let Some(file) = self.seg_file.take() {
            if let Err(e) = file.close().await {
                tracing::warn!("segment close during deinit: {e}");
            }
        }
        if self.phase != Phase::Done {
            // failed or aborted run: park the remote scratch in
            // discarding/ and purge it
            let usr = self.job.usr_id;
            let seq = self.job.req_seq;
            let discarding = layout::discarding_dir(usr, seq, &self.job.version);
            let _ = self
                .map
                .remote
                .mkdir(&layout::discarding_root(usr, seq), None, true)
                .await;
            if self.map.remote.rename(&self.remote_dir(), &discarding).await.is_ok() {
                let _ = remove_tree(&self.map.remote, &discarding).await;
            }
        }
        let _ = remove_tree(&self.map.local, &self.local_dir()).await;
        Ok(())
    }

    fn error_report(&self) -> &ErrorReport {
        &self.report
    }
}
