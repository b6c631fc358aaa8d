//! Master-playlist merging.
//!
//! Each committed version directory carries its own master-playlist
//! fragment listing that version's variant streams. At read time the
//! fragments are merged into one playlist: the first emitted chunk opens
//! with the `#EXTM3U` header, every later chunk begins with
//! `\n#EXT-X-STREAM-INF:`, and each inner playlist URI is rewritten to
//! point back at this service.

use vodvault_common::layout::MEDIA_PLAYLIST_FILENAME;
use vodvault_common::VersionId;

use crate::error::{Error, Result};
use crate::hls::StreamUrl;

/// Header every merged master playlist opens with.
pub const MASTER_HEADER: &str = "#EXTM3U\n#EXT-X-VERSION:7\n";

/// Incremental merger of per-version master-playlist fragments.
pub struct MasterPlaylistMerger {
    url: StreamUrl,
    num_merged: usize,
}

impl MasterPlaylistMerger {
    pub fn new(url: StreamUrl) -> Self {
        Self { url, num_merged: 0 }
    }

    /// Number of stream entries merged so far.
    pub fn num_merged(&self) -> usize {
        self.num_merged
    }

    /// Rewrite one version's fragment into the next output chunk.
    ///
    /// The fragment must open with `#EXTM3U` and an `#EXT-X-VERSION` tag,
    /// followed by `#EXT-X-STREAM-INF:<attrs>` lines each naming a
    /// relative media playlist on the following line.
    pub fn merge_fragment(&mut self, content: &str, version: &VersionId) -> Result<String> {
        let mut lines = content.lines();
        if lines.next() != Some("#EXTM3U") {
            return Err(Error::MissingTag("#EXTM3U"));
        }
        match lines.next() {
            Some(l) if l.starts_with("#EXT-X-VERSION:") => {
                l["#EXT-X-VERSION:".len()..]
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| Error::invalid_playlist("unparsable #EXT-X-VERSION"))?;
            }
            _ => return Err(Error::MissingTag("#EXT-X-VERSION")),
        }

        let mut out = String::new();
        let mut pending_inf: Option<&str> = None;
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
                if pending_inf.is_some() {
                    return Err(Error::invalid_playlist(
                        "#EXT-X-STREAM-INF without a following URI",
                    ));
                }
                pending_inf = Some(attrs);
            } else if line.starts_with('#') {
                // unknown tags inside a fragment are dropped from the merge
                continue;
            } else {
                let attrs = pending_inf.take().ok_or_else(|| {
                    Error::invalid_playlist("playlist URI without #EXT-X-STREAM-INF")
                })?;
                if self.num_merged == 0 && out.is_empty() {
                    out.push_str(MASTER_HEADER);
                } else {
                    out.push('\n');
                }
                out.push_str("#EXT-X-STREAM-INF:");
                out.push_str(attrs);
                out.push('\n');
                out.push_str(
                    &self
                        .url
                        .element_url(&format!("{version}/{MEDIA_PLAYLIST_FILENAME}")),
                );
                self.num_merged += 1;
            }
        }
        if pending_inf.is_some() {
            return Err(Error::invalid_playlist(
                "#EXT-X-STREAM-INF without a following URI",
            ));
        }
        if self.num_merged == 0 {
            return Err(Error::invalid_playlist("fragment lists no streams"));
        }
        Ok(out)
    }
}
