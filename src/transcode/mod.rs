//! The file-processor pipeline.
//!
//! One processor exists per combination of media kind and direction; a
//! factory selects the variant. Every processor implements the same small
//! operation surface: `init` acquires scratch and opens inputs,
//! `processing` advances the pipeline one re-entrant step,
//! `has_done_processing` reports completion, and `deinit` drives every
//! open handle closed and settles the scratch area (promoted on success,
//! discarded otherwise).

pub mod fetch;
pub mod hls;
pub mod image;
pub mod manager;
pub mod removal;
pub mod source;

use std::sync::Arc;

use async_trait::async_trait;
use vodvault_common::{Error, ErrorReport, ReqSeq, ResourceId, Result, UserId, VersionId};
use vodvault_storage::AsyncStorage;

use crate::config::TranscodeConfig;
use source::ChunkSource;

/// Progress of one `processing` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    InProgress,
    Done,
}

/// What a processor does with the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Transcode,
    Stream,
}

/// Media kind of the resource being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Parse the `media_type` column value.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "video" => Ok(Self::Video),
            "image" => Ok(Self::Image),
            other => Err(Error::invalid_input(format!("unknown media type: {other}"))),
        }
    }
}

/// Association of the source reader, destination (remote) storage and
/// local scratch storage of one in-flight job.
pub struct StorageMap {
    pub source: ChunkSource,
    pub remote: Arc<dyn AsyncStorage>,
    pub local: Arc<dyn AsyncStorage>,
}

/// Identity and output parameters of one transcode job.
#[derive(Debug, Clone)]
pub struct TranscodeJobSpec {
    pub resource_id: ResourceId,
    pub usr_id: UserId,
    pub req_seq: ReqSeq,
    pub version: VersionId,
    pub width: u32,
    pub height: u32,
}

/// The operation surface every concrete processor implements.
#[async_trait]
pub trait FileProcessor: Send {
    /// Acquire scratch areas and open inputs. Must not block on long
    /// work.
    async fn init(&mut self) -> Result<()>;

    /// Advance the pipeline by one step. Re-entrant; returns
    /// [`ProcessingState::Done`] once the run has settled its outputs.
    async fn processing(&mut self) -> Result<ProcessingState>;

    /// Completion predicate consulted by drivers.
    fn has_done_processing(&self) -> bool;

    /// Drive every open handle closed and settle the scratch area.
    /// Idempotent; safe to call after an error at any point.
    async fn deinit(&mut self) -> Result<()>;

    /// Structured errors accumulated by the run.
    fn error_report(&self) -> &ErrorReport;
}

/// Select the processor variant for a media kind and direction.
///
/// The streaming direction for video is served by the element engines on
/// the read path; this factory covers the transcode variants.
pub fn create_processor(
    kind: MediaKind,
    direction: Direction,
    job: TranscodeJobSpec,
    map: StorageMap,
    cfg: TranscodeConfig,
) -> Result<Box<dyn FileProcessor>> {
    match (kind, direction) {
        (MediaKind::Video, Direction::Transcode) => {
            Ok(Box::new(hls::HlsTranscodeProcessor::new(job, map, cfg)))
        }
        (MediaKind::Image, Direction::Transcode) => {
            Ok(Box::new(image::ImageTranscodeProcessor::new(job, map, cfg)))
        }
        (_, Direction::Stream) => Err(Error::invalid_input(
            "stream processors are driven by the read path",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_parse() {
        assert_eq!(MediaKind::parse("video").unwrap(), MediaKind::Video);
        assert_eq!(MediaKind::parse("image").unwrap(), MediaKind::Image);
        assert!(MediaKind::parse("audio").is_err());
    }
}
