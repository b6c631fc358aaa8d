//! Upload-part reception: multipart parsing, streaming SHA-1, and
//! buffered chunk writes.
//!
//! One HTTP body carries exactly one encapsulated part. The body is fed
//! to the multipart parser in bounded parse steps; part-data bytes land
//! in a write buffer that is flushed to the chunk file (and folded into
//! the running SHA-1) between steps, so arbitrarily large chunks stream
//! through a small, fixed amount of memory.

use sha1::{Digest, Sha1};
use vodvault_common::report::section;
use vodvault_common::ErrorReport;
use vodvault_multipart::{MultipartHandler, MultipartParser, ParseFlow};
use vodvault_storage::StorageFile;

/// Result of a fully received part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartOutcome {
    /// Lowercase hex SHA-1 of the part body.
    pub checksum: String,
    /// Part body size in bytes.
    pub size_bytes: u64,
}

/// Why a part body was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartError {
    /// The entity carries more than one encapsulated part.
    MultipleParts,
    /// Framing never reached the entity terminator, or broke mid-way.
    Malformed,
    /// Part data outran the write buffer inside one parse step.
    BufferOverflow,
}

impl PartError {
    /// Record the rejection in a request report with its section and
    /// status.
    pub fn into_report(self) -> ErrorReport {
        let mut report = ErrorReport::new();
        match self {
            PartError::MultipleParts => {
                report.fail(section::BODY, "more than one part in multipart entity", 400)
            }
            PartError::Malformed => report.fail(section::BODY, "malformed multipart entity", 400),
            PartError::BufferOverflow => {
                report.fail(section::BODY, "part data exceeded the write buffer", 400)
            }
        }
        report
    }
}

/// Parser event sink: counts parts, buffers part data, flags completion.
struct PartSink {
    wr_buf: Vec<u8>,
    wr_capacity: usize,
    num_parts: usize,
    ended: bool,
    overflow: bool,
}

impl MultipartHandler for PartSink {
    fn on_part_data_begin(&mut self) -> ParseFlow {
        self.num_parts += 1;
        if self.num_parts > 1 {
            ParseFlow::Halt
        } else {
            ParseFlow::Continue
        }
    }

    fn on_part_data(&mut self, data: &[u8]) -> ParseFlow {
        if self.wr_buf.len() + data.len() > self.wr_capacity {
            self.overflow = true;
            return ParseFlow::Halt;
        }
        self.wr_buf.extend_from_slice(data);
        ParseFlow::Continue
    }

    fn on_body_end(&mut self) -> ParseFlow {
        self.ended = true;
        ParseFlow::Continue
    }
}

/// Stream one multipart entity into `file`, returning the checksum and
/// size of the single part it must contain.
///
/// `parse_step` bounds how much input each parser round sees;
/// `write_buf` bounds the buffered part data and must leave room for the
/// look-behind re-emission on top of one parse step.
pub async fn receive_part(
    body: &[u8],
    boundary: &str,
    file: &mut Box<dyn StorageFile>,
    parse_step: usize,
    write_buf: usize,
) -> Result<PartOutcome, PartError> {
    let mut parser = MultipartParser::new(boundary);
    // a broken tentative boundary chain re-emits up to the look-behind
    // length on top of the step's own bytes
    let wr_capacity = write_buf.max(parse_step + boundary.len() + 8);
    let mut sink = PartSink {
        wr_buf: Vec::with_capacity(wr_capacity),
        wr_capacity,
        num_parts: 0,
        ended: false,
        overflow: false,
    };
    let mut checksum = Sha1::new();
    let mut total: u64 = 0;
    let mut rd_idx = 0usize;

    while rd_idx < body.len() && !sink.ended {
        let step_end = (rd_idx + parse_step.max(1)).min(body.len());
        let slice = &body[rd_idx..step_end];
        let consumed = parser.execute(&mut sink, slice);

        if !sink.wr_buf.is_empty() {
            checksum.update(&sink.wr_buf);
            file.write_at(None, &sink.wr_buf)
                .await
                .map_err(|_| PartError::Malformed)?;
            total += sink.wr_buf.len() as u64;
            sink.wr_buf.clear();
        }

        if consumed < slice.len() && !parser.entity_ended() {
            if sink.num_parts > 1 {
                return Err(PartError::MultipleParts);
            }
            if sink.overflow {
                return Err(PartError::BufferOverflow);
            }
            return Err(PartError::Malformed);
        }
        rd_idx += consumed.max(1);
    }

    if !sink.ended {
        return Err(PartError::Malformed);
    }
    Ok(PartOutcome {
        checksum: hex::encode(checksum.finalize()),
        size_bytes: total,
    })
}

/// Pull the boundary out of a `multipart/form-data` content type.
pub fn find_boundary(content_type: &str) -> Option<&str> {
    let marker = "boundary=";
    let start = content_type.find(marker)? + marker.len();
    let rest = &content_type[start..];
    let end = rest.find(';').unwrap_or(rest.len());
    let boundary = rest[..end].trim().trim_matches('"');
    if boundary.is_empty() {
        None
    } else {
        Some(boundary)
    }
}
