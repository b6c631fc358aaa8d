//! Vodvault-Multipart: streaming multipart/form-data parser.
//!
//! A pure state machine that consumes arbitrary-sized chunks of an HTTP
//! `multipart/form-data` body and emits header-field, header-value,
//! part-begin/data/end and body-end events to a [`MultipartHandler`].
//!
//! Boundary detection inside part data uses a look-behind buffer of
//! `4 + boundary_len` bytes: when a byte matches the start of the
//! `\r\n--<boundary>` transition pattern the parser enters a tentative
//! chain and buffers the bytes already seen; if the chain breaks before the
//! boundary fully matches, the buffered bytes are re-emitted as part data
//! and the offending input byte is consumed again in the data state.
//!
//! [`MultipartParser::execute`] may be called any number of times on
//! successive buffer chunks; state is preserved across calls. The return
//! value is the number of input bytes consumed, which equals the input
//! length on normal progress and may be less when a framing error is hit or
//! a handler returned [`ParseFlow::Halt`].

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const HYPHEN: u8 = b'-';

/// The `\r\n--` pattern that introduces every non-initial boundary.
const BOUNDARY_TRANSITION: [u8; 4] = [CR, LF, HYPHEN, HYPHEN];

/// Flow-control value returned by handler callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFlow {
    /// Keep consuming input.
    Continue,
    /// Stop parsing; `execute` returns the current consumed count.
    Halt,
}

/// Event sink driven by [`MultipartParser::execute`].
///
/// All methods default to [`ParseFlow::Continue`]; implement only the
/// events you care about. Data callbacks may be invoked several times per
/// logical element when the element spans input chunks.
pub trait MultipartHandler {
    fn on_header_field(&mut self, _data: &[u8]) -> ParseFlow {
        ParseFlow::Continue
    }
    fn on_header_value(&mut self, _data: &[u8]) -> ParseFlow {
        ParseFlow::Continue
    }
    fn on_part_data_begin(&mut self) -> ParseFlow {
        ParseFlow::Continue
    }
    fn on_headers_complete(&mut self) -> ParseFlow {
        ParseFlow::Continue
    }
    fn on_part_data(&mut self, _data: &[u8]) -> ParseFlow {
        ParseFlow::Continue
    }
    fn on_part_data_end(&mut self) -> ParseFlow {
        ParseFlow::Continue
    }
    fn on_body_end(&mut self) -> ParseFlow {
        ParseFlow::Continue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    EntityStart,
    InitialBoundary,
    HeaderFieldStart,
    HeaderFieldProceed,
    HeadersPossibleEnd,
    HeaderValueStart,
    HeaderValueProceed,
    HeaderValuePossibleEnd,
    PartDataStart,
    PartDataProceed,
    PartDataCr,
    PartDataLf,
    PartDataNewlineHyphen,
    NextBoundary,
    PartDataPossibleEnd,
    PartDataEnd,
    EntityPossibleEnd,
    EntityEnd,
}

/// Streaming multipart parser. One instance per entity.
pub struct MultipartParser {
    boundary: Vec<u8>,
    lookbehind: Vec<u8>,
    index: usize,
    state: State,
}

macro_rules! emit {
    ($handler:ident . $cb:ident ( $($arg:expr),* ), $i:expr) => {
        if $handler.$cb($($arg),*) == ParseFlow::Halt {
            return $i;
        }
    };
}

impl MultipartParser {
    /// Create a parser for the given boundary (without the leading `--`).
    pub fn new(boundary: &str) -> Self {
        let boundary = boundary.as_bytes().to_vec();
        let lookbehind = vec![0u8; BOUNDARY_TRANSITION.len() + boundary.len()];
        Self {
            boundary,
            lookbehind,
            index: 0,
            state: State::EntityStart,
        }
    }

    /// True once the closing `--boundary--` delimiter has been consumed.
    pub fn entity_ended(&self) -> bool {
        self.state == State::EntityEnd
    }

    /// Feed one chunk of the entity. Returns the number of bytes consumed.
    pub fn execute<H: MultipartHandler>(&mut self, handler: &mut H, buf: &[u8]) -> usize {
        let len = buf.len();
        let mut i = 0usize;
        let mut mark = 0usize;

        while i < len {
            let c = buf[i];
            let is_last = i == len - 1;
            match self.state {
                State::EntityStart => {
                    // the entity must open with the two hyphens of the very
                    // first boundary delimiter
                    if c != HYPHEN {
                        return i;
                    }
                    self.index += 1;
                    if self.index == 2 {
                        self.index = 0;
                        self.state = State::InitialBoundary;
                    }
                }

                State::InitialBoundary => {
                    if self.index == self.boundary.len() {
                        if c == CR {
                            self.index += 1;
                        } else if c == HYPHEN {
                            // closing delimiter right after the first
                            // boundary: entity with no parts
                            self.state = State::EntityPossibleEnd;
                        } else {
                            return i;
                        }
                    } else if self.index == self.boundary.len() + 1 {
                        if c != LF {
                            return i;
                        }
                        self.index = 0;
                        self.state = State::HeaderFieldStart;
                        emit!(handler.on_part_data_begin(), i);
                    } else if c == self.boundary[self.index] {
                        self.index += 1;
                    } else {
                        return i;
                    }
                }

                State::HeaderFieldStart => {
                    mark = i;
                    self.state = State::HeaderFieldProceed;
                    continue;
                }

                State::HeaderFieldProceed => {
                    if c == CR {
                        self.state = State::HeadersPossibleEnd;
                    } else if c == b':' {
                        emit!(handler.on_header_field(&buf[mark..i]), i);
                        self.state = State::HeaderValueStart;
                    } else if c == HYPHEN || c.is_ascii_alphabetic() {
                        if is_last {
                            emit!(handler.on_header_field(&buf[mark..=i]), i);
                        }
                    } else {
                        // invalid character in header name
                        return i;
                    }
                }

                State::HeadersPossibleEnd => {
                    if c != LF {
                        return i;
                    }
                    self.state = State::PartDataStart;
                }

                State::HeaderValueStart => {
                    if c == b' ' {
                        i += 1;
                        continue;
                    }
                    mark = i;
                    self.state = State::HeaderValueProceed;
                    continue;
                }

                State::HeaderValueProceed => {
                    if c == CR {
                        emit!(handler.on_header_value(&buf[mark..i]), i);
                        self.state = State::HeaderValuePossibleEnd;
                    } else if is_last {
                        emit!(handler.on_header_value(&buf[mark..=i]), i);
                    }
                }

                State::HeaderValuePossibleEnd => {
                    if c != LF {
                        return i;
                    }
                    self.state = State::HeaderFieldStart;
                }

                State::PartDataStart => {
                    emit!(handler.on_headers_complete(), i);
                    mark = i;
                    self.state = State::PartDataProceed;
                    continue;
                }

                State::PartDataProceed => {
                    if c == BOUNDARY_TRANSITION[0] {
                        // possibly the next boundary; start the tentative
                        // chain and hold the CR in the look-behind buffer
                        if i > mark {
                            emit!(handler.on_part_data(&buf[mark..i]), i);
                            mark = i;
                        }
                        self.state = State::PartDataCr;
                        self.lookbehind[0] = BOUNDARY_TRANSITION[0];
                    } else if is_last {
                        emit!(handler.on_part_data(&buf[mark..=i]), i);
                    }
                }

                State::PartDataCr | State::PartDataLf | State::PartDataNewlineHyphen => {
                    let delta = match self.state {
                        State::PartDataCr => 0,
                        State::PartDataLf => 1,
                        _ => 2,
                    };
                    if c == BOUNDARY_TRANSITION[1 + delta] {
                        self.lookbehind[1 + delta] = c;
                        self.state = match self.state {
                            State::PartDataCr => State::PartDataLf,
                            State::PartDataLf => State::PartDataNewlineHyphen,
                            _ => {
                                self.index = 0;
                                State::NextBoundary
                            }
                        };
                    } else {
                        // chain broken: the held bytes still belong to the
                        // current part, and the current byte is re-consumed
                        // in the data state
                        let held = 1 + delta;
                        emit!(handler.on_part_data(&self.lookbehind[..held]), i);
                        self.state = State::PartDataProceed;
                        mark = i;
                        continue;
                    }
                }

                State::NextBoundary => {
                    if c == self.boundary[self.index] {
                        self.lookbehind[BOUNDARY_TRANSITION.len() + self.index] = c;
                        self.index += 1;
                        if self.index == self.boundary.len() {
                            emit!(handler.on_part_data_end(), i);
                            self.state = State::PartDataPossibleEnd;
                        }
                    } else {
                        let held = BOUNDARY_TRANSITION.len() + self.index;
                        emit!(handler.on_part_data(&self.lookbehind[..held]), i);
                        self.state = State::PartDataProceed;
                        mark = i;
                        continue;
                    }
                }

                State::PartDataPossibleEnd => {
                    if c == HYPHEN {
                        self.state = State::EntityPossibleEnd;
                    } else if c == CR {
                        self.state = State::PartDataEnd;
                    } else {
                        return i;
                    }
                }

                State::PartDataEnd => {
                    if c != LF {
                        return i;
                    }
                    self.state = State::HeaderFieldStart;
                    emit!(handler.on_part_data_begin(), i);
                }

                State::EntityPossibleEnd => {
                    if c != HYPHEN {
                        return i;
                    }
                    emit!(handler.on_body_end(), i);
                    self.state = State::EntityEnd;
                    // the closing hyphen is consumed; trailing bytes after
                    // the terminator are not
                    return i + 1;
                }

                State::EntityEnd => {
                    return i;
                }
            }
            i += 1;
        }
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects every event for assertions.
    #[derive(Default)]
    struct Recorder {
        header_fields: Vec<Vec<u8>>,
        header_values: Vec<Vec<u8>>,
        part_data: Vec<u8>,
        parts_begun: usize,
        parts_ended: usize,
        headers_complete: usize,
        body_ended: usize,
        halt_on_part_begin: bool,
    }

    impl MultipartHandler for Recorder {
        fn on_header_field(&mut self, data: &[u8]) -> ParseFlow {
            match self.header_fields.last_mut() {
                Some(last) if self.header_values.len() < self.header_fields.len() => {
                    last.extend_from_slice(data)
                }
                _ => self.header_fields.push(data.to_vec()),
            }
            ParseFlow::Continue
        }

        fn on_header_value(&mut self, data: &[u8]) -> ParseFlow {
            if self.header_values.len() < self.header_fields.len() {
                self.header_values.push(data.to_vec());
            } else if let Some(last) = self.header_values.last_mut() {
                last.extend_from_slice(data);
            }
            ParseFlow::Continue
        }

        fn on_part_data_begin(&mut self) -> ParseFlow {
            self.parts_begun += 1;
            if self.halt_on_part_begin {
                ParseFlow::Halt
            } else {
                ParseFlow::Continue
            }
        }

        fn on_headers_complete(&mut self) -> ParseFlow {
            self.headers_complete += 1;
            ParseFlow::Continue
        }

        fn on_part_data(&mut self, data: &[u8]) -> ParseFlow {
            self.part_data.extend_from_slice(data);
            ParseFlow::Continue
        }

        fn on_part_data_end(&mut self) -> ParseFlow {
            self.parts_ended += 1;
            ParseFlow::Continue
        }

        fn on_body_end(&mut self) -> ParseFlow {
            self.body_ended += 1;
            ParseFlow::Continue
        }
    }

    fn entity(boundary: &str, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"content-disposition: form-data; name=\"file\"\r\n");
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"--");
        out
    }

    #[test]
    fn test_single_part_in_one_call() {
        let input = entity("xyz123", b"hello multipart world");
        let mut rec = Recorder::default();
        let mut parser = MultipartParser::new("xyz123");

        let consumed = parser.execute(&mut rec, &input);
        assert_eq!(consumed, input.len());
        assert_eq!(rec.parts_begun, 1);
        assert_eq!(rec.parts_ended, 1);
        assert_eq!(rec.headers_complete, 1);
        assert_eq!(rec.body_ended, 1);
        assert_eq!(rec.part_data, b"hello multipart world");
        assert_eq!(rec.header_fields, vec![b"content-disposition".to_vec()]);
        assert_eq!(
            rec.header_values,
            vec![b"form-data; name=\"file\"".to_vec()]
        );
        assert!(parser.entity_ended());
    }

    #[test]
    fn test_part_data_total_preserved_across_all_fragmentations() {
        // invariant: total bytes delivered to on_part_data equal the part
        // body for every split position, including splits inside the
        // boundary transition
        let body = b"abc\r\n-not-a-boundary\r\ndef";
        let input = entity("bnd", body);
        for split in 1..input.len() {
            let mut rec = Recorder::default();
            let mut parser = MultipartParser::new("bnd");
            let n1 = parser.execute(&mut rec, &input[..split]);
            assert_eq!(n1, split, "split at {split}");
            let n2 = parser.execute(&mut rec, &input[split..]);
            assert_eq!(n2, input.len() - split, "split at {split}");
            assert_eq!(rec.part_data, body, "split at {split}");
            assert_eq!(rec.body_ended, 1, "split at {split}");
        }
    }

    #[test]
    fn test_lookbehind_false_boundary_reemitted() {
        // `\r\n--wrong` shares the transition prefix with the real boundary
        // and must be re-emitted as part data once the chain breaks
        let body = b"head\r\n--wrong tail";
        let input = entity("right", body);
        let mut rec = Recorder::default();
        let mut parser = MultipartParser::new("right");

        let consumed = parser.execute(&mut rec, &input);
        assert_eq!(consumed, input.len());
        assert_eq!(rec.part_data, body);
    }

    #[test]
    fn test_two_parts() {
        let boundary = "sep";
        let mut input = Vec::new();
        input.extend_from_slice(b"--sep\r\nname: a\r\n\r\nAAA\r\n--sep\r\n");
        input.extend_from_slice(b"name: b\r\n\r\nBBBB\r\n--sep--");
        let mut rec = Recorder::default();
        let mut parser = MultipartParser::new(boundary);

        let consumed = parser.execute(&mut rec, &input);
        assert_eq!(consumed, input.len());
        assert_eq!(rec.parts_begun, 2);
        assert_eq!(rec.parts_ended, 2);
        assert_eq!(rec.part_data, b"AAABBBB");
        assert_eq!(rec.body_ended, 1);
    }

    #[test]
    fn test_closing_only_entity_fires_body_end() {
        // an entity of exactly `--boundary--` carries no parts
        let input = b"--empty123--";
        let mut rec = Recorder::default();
        let mut parser = MultipartParser::new("empty123");

        let consumed = parser.execute(&mut rec, input);
        assert_eq!(consumed, input.len());
        assert_eq!(rec.body_ended, 1);
        assert_eq!(rec.parts_begun, 0);
        assert_eq!(rec.parts_ended, 0);
        assert!(rec.part_data.is_empty());
    }

    #[test]
    fn test_bad_prefix_stops_with_nothing_emitted() {
        let input = b"not a multipart body";
        let mut rec = Recorder::default();
        let mut parser = MultipartParser::new("bnd");

        let consumed = parser.execute(&mut rec, input);
        assert_eq!(consumed, 0);
        assert_eq!(rec.parts_begun, 0);
        assert_eq!(rec.body_ended, 0);
    }

    #[test]
    fn test_boundary_mismatch_stops_early() {
        let input = b"--other\r\nname: a\r\n\r\nAAA\r\n--other--";
        let mut rec = Recorder::default();
        let mut parser = MultipartParser::new("bnd");

        let consumed = parser.execute(&mut rec, input);
        assert!(consumed < input.len());
        assert_eq!(rec.parts_begun, 0);
    }

    #[test]
    fn test_invalid_header_character_stops() {
        let input = b"--b\r\nna me: x\r\n\r\ndata\r\n--b--";
        let mut rec = Recorder::default();
        let mut parser = MultipartParser::new("b");

        let consumed = parser.execute(&mut rec, input);
        assert!(consumed < input.len());
    }

    #[test]
    fn test_handler_halt_stops_consumption() {
        let input = entity("bnd", b"payload");
        let mut rec = Recorder {
            halt_on_part_begin: true,
            ..Recorder::default()
        };
        let mut parser = MultipartParser::new("bnd");

        let consumed = parser.execute(&mut rec, &input);
        assert!(consumed < input.len());
        assert_eq!(rec.parts_begun, 1);
        assert!(rec.part_data.is_empty());
    }

    #[test]
    fn test_header_value_leading_space_skipped() {
        let input = entity("bnd", b"x");
        let mut rec = Recorder::default();
        let mut parser = MultipartParser::new("bnd");
        parser.execute(&mut rec, &input);
        // "content-disposition: form-data..." value starts after ": "
        assert!(rec.header_values[0].starts_with(b"form-data"));
    }

    #[test]
    fn test_trailing_bytes_after_terminator_not_consumed() {
        let mut input = entity("bnd", b"x");
        let end = input.len();
        input.extend_from_slice(b"\r\ngarbage");
        let mut rec = Recorder::default();
        let mut parser = MultipartParser::new("bnd");

        let consumed = parser.execute(&mut rec, &input);
        assert_eq!(consumed, end);
        assert_eq!(rec.body_ended, 1);
    }
}
