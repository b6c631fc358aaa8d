//! Image transcode processor.
//!
//! Decodes the concatenated original, re-encodes a JPEG plus resized
//! variants into local scratch, then promotes the version tree the same
//! way the HLS destination does.

use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::ImageFormat;
use vodvault_common::report::section;
use vodvault_common::{layout, Error, ErrorReport, Result};
use vodvault_storage::{write_all, StorageError};

use crate::config::TranscodeConfig;
use crate::transcode::removal::remove_tree;
use crate::transcode::{FileProcessor, ProcessingState, StorageMap, TranscodeJobSpec};

/// Width in pixels of each generated variant, by filename stem.
const VARIANTS: &[(&str, Option<u32>)] = &[
    ("original", None),
    ("large", Some(500)),
    ("medium", Some(300)),
    ("small", Some(150)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collect,
    Encode,
    MoveToStorage,
    Done,
}

/// Transcode processor for image resources.
pub struct ImageTranscodeProcessor {
    job: TranscodeJobSpec,
    map: StorageMap,
    cfg: TranscodeConfig,
    phase: Phase,
    collected: Vec<u8>,
    report: ErrorReport,
    deinit_done: bool,
}

impl ImageTranscodeProcessor {
    pub fn new(job: TranscodeJobSpec, map: StorageMap, cfg: TranscodeConfig) -> Self {
        Self {
            job,
            map,
            cfg,
            phase: Phase::Collect,
            collected: Vec::new(),
            report: ErrorReport::new(),
            deinit_done: false,
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

    async fn encode_variants(&mut self) -> Result<()> {
        let img = image::load_from_memory(&self.collected).map_err(|e| {
            self.report
                .fail(section::TRANSCODER, format!("image decode: {e}"), 400);
            Error::invalid_input(format!("image decode: {e}"))
        })?;
        for (stem, width) in VARIANTS {
            let variant = match width {
                Some(w) if img.width() > *w => {
                    let h = (*w as f64 * img.height() as f64 / img.width() as f64) as u32;
                    img.resize(*w, h.max(1), FilterType::Lanczos3)
                }
                _ => img.clone(),
            };
            let mut encoded = Vec::new();
            variant
                .to_rgb8()
                .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
                .map_err(|e| {
                    let msg = format!("jpeg encode: {e}");
                    self.report.set(section::TRANSCODER, msg.clone());
                    Error::internal(msg)
                })?;
            let path = self.local_dir().join(format!("{stem}.jpg"));
            write_all(self.map.local.as_ref(), &path, &encoded)
                .await
                .map_err(|e| self.storage_failure("variant write", e))?;
        }
        Ok(())
    }

    async fn move_to_storage(&mut self) -> Result<()> {
        // copy every produced variant to the remote transcoding area
        let mut cursor = self
            .map
            .local
            .scandir(&self.local_dir())
            .await
            .map_err(|e| self.storage_failure("scratch scandir", e))?;
        let mut names = Vec::new();
        while let Some(entry) = cursor.next() {
            names.push(entry.name.clone());
        }
        for name in names {
            let data = vodvault_storage::read_to_vec(
                self.map.local.as_ref(),
                &self.local_dir().join(&name),
                self.cfg.read_buf_bytes,
            )
            .await
            .map_err(|e| self.storage_failure("variant read", e))?;
            write_all(self.map.remote.as_ref(), &self.remote_dir().join(&name), &data)
                .await
                .map_err(|e| self.storage_failure("variant upload", e))?;
        }

        let usr = self.job.usr_id;
        let seq = self.job.req_seq;
        let committed = layout::committed_dir(usr, seq, &self.job.version);
        self.map
            .remote
            .mkdir(&layout::committed_root(usr, seq), None, true)
            .await
            .map_err(|e| self.storage_failure("committed root mkdir", e))?;
        if self.map.remote.scandir(&committed).await.is_ok() {
            remove_tree(&self.map.remote, &committed)
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
impl FileProcessor for ImageTranscodeProcessor {
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
        Ok(())
    }

    async fn processing(&mut self) -> Result<ProcessingState> {
        match self.phase {
            Phase::Collect => {
                let mut buf = vec![0u8; self.cfg.read_buf_bytes];
                let n = self
                    .map
                    .source
                    .read(&mut buf)
                    .await
                    .map_err(|e| self.storage_failure("source read", e))?;
                if n == 0 {
                    self.phase = Phase::Encode;
                } else {
                    self.collected.extend_from_slice(&buf[..n]);
                }
                Ok(ProcessingState::InProgress)
            }
            Phase::Encode => {
                self.encode_variants().await?;
                self.phase = Phase::MoveToStorage;
                Ok(ProcessingState::InProgress)
            }
            Phase::MoveToStorage => {
                self.move_to_storage().await?;
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
        if self.phase != Phase::Done {
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
