//! Media (level-2) playlist rewriting.
//!
//! The stored playlist references its init map and segments by relative
//! name. At read time every URI is redirected to this service, and an
//! `#EXT-X-KEY` tag carrying the variant's key URL and IV is inserted
//! between the header tags and the `#EXT-X-MAP` line.
//!
//! Output is emitted in chunks bounded by the caller's write-buffer size:
//! [`MediaPlaylistRewriter::next_chunk`] packs whole entries until the
//! next one would overflow, then returns so the caller can flush; the
//! rewriter resumes from the saved read pointer on the following call.

use vodvault_common::VersionId;

use crate::error::{Error, Result};
use crate::hls::StreamUrl;
use crate::keystore::KeyEntry;

/// Header tags a stored media playlist must carry.
const REQUIRED_TAGS: [&str; 6] = [
    "#EXTM3U",
    "#EXT-X-VERSION",
    "#EXT-X-TARGETDURATION",
    "#EXT-X-MEDIA-SEQUENCE",
    "#EXT-X-PLAYLIST-TYPE",
    "#EXT-X-MAP",
];

/// Resumable rewriter for one variant's media playlist.
pub struct MediaPlaylistRewriter {
    pieces: Vec<String>,
    rd_idx: usize,
    out_capacity: usize,
}

impl MediaPlaylistRewriter {
    /// Validate `src` and prepare the rewritten output.
    ///
    /// `out_capacity` bounds the size of each chunk handed back by
    /// [`next_chunk`]; a single piece larger than the capacity is emitted
    /// alone.
    pub fn new(
        src: &str,
        url: &StreamUrl,
        version: &VersionId,
        key_entry: &KeyEntry,
        out_capacity: usize,
    ) -> Result<Self> {
        for tag in REQUIRED_TAGS {
            if !src.lines().any(|l| l.starts_with(tag)) {
                return Err(Error::MissingTag(tag));
            }
        }

        // the key URI names the variant so the key endpoint can resolve
        // this version's entry through its own metadata
        let key_line = format!(
            "#EXT-X-KEY:METHOD=AES-{},URI=\"{}\",IV=0x{}",
            key_entry.key_bits(),
            url.element_url(&format!("{version}/crypto_key")),
            key_entry.iv.data,
        );

        let mut pieces = Vec::new();
        let mut header = String::new();
        let mut in_header = true;
        let mut pending_inf: Option<String> = None;

        for line in src.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if in_header {
                if line.starts_with("#EXTINF:") {
                    in_header = false;
                    pieces.push(std::mem::take(&mut header));
                } else if let Some(rest) = line.strip_prefix("#EXT-X-MAP:") {
                    header.push_str(&key_line);
                    header.push('\n');
                    header.push_str(&rewrite_map_line(rest, url, version)?);
                    header.push('\n');
                    continue;
                } else {
                    header.push_str(line);
                    header.push('\n');
                    continue;
                }
            }
            // body
            if let Some(dur) = line.strip_prefix("#EXTINF:") {
                if pending_inf.is_some() {
                    return Err(Error::invalid_playlist("#EXTINF without a segment URI"));
                }
                pending_inf = Some(dur.to_string());
            } else if line.starts_with('#') {
                pieces.push(format!("{line}\n"));
            } else {
                let dur = pending_inf
                    .take()
                    .ok_or_else(|| Error::invalid_playlist("segment URI without #EXTINF"))?;
                let name = basename(line);
                let seg_url = url.element_url(&format!("{version}/{name}"));
                pieces.push(format!("#EXTINF:{dur}\n{seg_url}\n"));
            }
        }
        if in_header {
            return Err(Error::invalid_playlist("playlist lists no segments"));
        }
        if pending_inf.is_some() {
            return Err(Error::invalid_playlist("#EXTINF without a segment URI"));
        }

        Ok(Self {
            pieces,
            rd_idx: 0,
            out_capacity,
        })
    }

    /// True once every piece has been emitted.
    pub fn finished(&self) -> bool {
        self.rd_idx == self.pieces.len()
    }

    /// Emit the next bounded chunk, or `None` when the rewrite is done.
    pub fn next_chunk(&mut self) -> Option<String> {
        if self.finished() {
            return None;
        }
        let mut out = String::new();
        while self.rd_idx < self.pieces.len() {
            let piece = &self.pieces[self.rd_idx];
            if !out.is_empty() && out.len() + piece.len() > self.out_capacity {
                break;
            }
            out.push_str(piece);
            self.rd_idx += 1;
            if out.len() >= self.out_capacity {
                break;
            }
        }
        Some(out)
    }
}

/// Last path component of a playlist URI.
fn basename(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// Rewrite the URI attribute of an `#EXT-X-MAP` tag, preserving the other
/// attributes.
fn rewrite_map_line(attrs: &str, url: &StreamUrl, version: &VersionId) -> Result<String> {
    let uri_start = attrs
        .find("URI=\"")
        .ok_or_else(|| Error::invalid_playlist("#EXT-X-MAP without URI attribute"))?;
    let value_start = uri_start + "URI=\"".len();
    let value_len = attrs[value_start..]
        .find('"')
        .ok_or_else(|| Error::invalid_playlist("#EXT-X-MAP URI attribute is unterminated"))?;
    let old_uri = &attrs[value_start..value_start + value_len];
    let new_uri = url.element_url(&format!("{version}/{}", basename(old_uri)));
    Ok(format!(
        "#EXT-X-MAP:{}URI=\"{}\"{}",
        &attrs[..uri_start],
        new_uri,
        &attrs[value_start + value_len + 1..]
    ))
}
