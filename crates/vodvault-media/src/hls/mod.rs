//! HLS playlist engines and segment encryption.
//!
//! - [`MasterPlaylistMerger`] merges the per-version master-playlist
//!   fragments into one playlist whose inner URLs point back at this
//!   service.
//! - [`MediaPlaylistRewriter`] rewrites one variant's media playlist:
//!   inserts the `EXT-X-KEY` tag, redirects the `EXT-X-MAP` and every
//!   segment URI, and emits bounded output chunks that can be resumed
//!   between HTTP response frames.
//! - [`SegmentEncryptor`] encrypts segment bytes with AES-128-CBC as they
//!   stream out.

mod master;
mod media;
mod segment;

pub use master::MasterPlaylistMerger;
pub use media::MediaPlaylistRewriter;
pub use segment::{SegmentEncryptor, AES_BLOCK_SIZE};

/// Address of this service as seen by the client, plus the configured
/// query-parameter labels. Every rewritten URL is built from it.
#[derive(Debug, Clone)]
pub struct StreamUrl {
    /// Domain name and optional port.
    pub host: String,
    /// Endpoint path serving stream elements.
    pub path: String,
    /// Query-parameter label carrying the document id.
    pub doc_label: String,
    /// Query-parameter label carrying the element detail.
    pub detail_label: String,
    /// Encoded document id of the resource being streamed.
    pub doc_id: String,
}

impl StreamUrl {
    /// URL of one stream element of this resource.
    pub fn element_url(&self, detail: &str) -> String {
        format!(
            "https://{}{}?{}={}&{}={}",
            self.host, self.path, self.doc_label, self.doc_id, self.detail_label, detail
        )
    }
}
