//! Incremental parser for the BMFF-style JPEG XL container.
//!
//! The parser accepts byte chunks of unspecified size, recognizes either a
//! bare codestream or a box-structured container, and appends the logical
//! codestream bytes to a caller-owned buffer. Bytes that cannot be processed
//! yet (for example a partially received box header) are left unconsumed and
//! must be fed again together with later input.

use crate::{Error, Result};

const BARE_SIGNATURE: [u8; 2] = [0xff, 0x0a];
const CONTAINER_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0c, b'J', b'X', b'L', b' ', 0x0d, 0x0a, 0x87, 0x0a,
];
const FTYP_BOX: [u8; 20] = [
    0x00, 0x00, 0x00, 0x14, b'f', b't', b'y', b'p', b'j', b'x', b'l', b' ', 0x00, 0x00, 0x00, 0x00,
    b'j', b'x', b'l', b' ',
];

/// Structure of the bitstream recognized so far.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BitstreamKind {
    /// Not enough input to decide.
    Unknown,
    /// A codestream without any container wrapper.
    BareCodestream,
    /// A box-structured container holding the codestream.
    Container,
    /// Not a JPEG XL image.
    Invalid,
}

#[derive(Debug, Default)]
enum ParserState {
    #[default]
    WaitingSignature,
    WaitingFtyp,
    WaitingBoxHeader,
    /// Inside a codestream-carrying box. `None` means the box extends to the
    /// end of the file.
    InCodestream {
        bytes_left: Option<u64>,
    },
    /// Inside a box whose payload is skipped.
    InAuxBox {
        bytes_left: Option<u64>,
    },
    /// Waiting for the one-byte payload of a `jxll` box.
    InLevelBox,
    Invalid,
}

/// Incremental container parser.
#[derive(Debug, Default)]
pub struct ContainerParser {
    state: ParserState,
    next_jxlp_index: u32,
    jxlp_finished: bool,
    saw_jxlc: bool,
    saw_jxll: bool,
    saw_jxli: bool,
    saw_codestream: bool,
    codestream_complete: bool,
}

impl ContainerParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the kind of bitstream recognized so far.
    pub fn kind(&self) -> BitstreamKind {
        match self.state {
            ParserState::WaitingSignature => BitstreamKind::Unknown,
            ParserState::InCodestream { bytes_left: None } if !self.saw_codestream => {
                BitstreamKind::BareCodestream
            }
            ParserState::Invalid => BitstreamKind::Invalid,
            _ => BitstreamKind::Container,
        }
    }

    /// Returns whether every codestream box has been fully received.
    ///
    /// For a bare codestream this never becomes true; the caller decides when
    /// the input ends.
    pub fn codestream_complete(&self) -> bool {
        self.codestream_complete
    }

    /// Feeds a chunk of input, appending codestream bytes to `codestream`.
    ///
    /// Returns the number of input bytes consumed. Unconsumed bytes must be
    /// included in the next call.
    pub fn feed(&mut self, input: &[u8], codestream: &mut Vec<u8>) -> Result<usize> {
        let mut pos = 0usize;
        loop {
            let buf = &input[pos..];
            match &mut self.state {
                ParserState::WaitingSignature => {
                    if prefix_matches(buf, &BARE_SIGNATURE) {
                        if buf.len() < BARE_SIGNATURE.len() {
                            return Ok(pos);
                        }
                        tracing::debug!("bare codestream signature found");
                        self.state = ParserState::InCodestream { bytes_left: None };
                        continue;
                    }
                    if prefix_matches(buf, &CONTAINER_SIGNATURE) {
                        if buf.len() < CONTAINER_SIGNATURE.len() {
                            return Ok(pos);
                        }
                        tracing::debug!("container signature found");
                        pos += CONTAINER_SIGNATURE.len();
                        self.state = ParserState::WaitingFtyp;
                        continue;
                    }
                    self.state = ParserState::Invalid;
                    return Err(Error::InvalidSignature);
                }
                ParserState::WaitingFtyp => {
                    if !prefix_matches(buf, &FTYP_BOX) {
                        self.state = ParserState::Invalid;
                        return Err(Error::InvalidBox("expected ftyp box with brand `jxl `"));
                    }
                    if buf.len() < FTYP_BOX.len() {
                        return Ok(pos);
                    }
                    pos += FTYP_BOX.len();
                    self.state = ParserState::WaitingBoxHeader;
                }
                ParserState::WaitingBoxHeader => {
                    let Some((header, header_len)) = BoxHeader::parse(buf)? else {
                        return Ok(pos);
                    };
                    match &header.ty {
                        b"jxll" => {
                            if self.saw_jxll {
                                return self.fail(Error::InvalidBox("multiple jxll boxes"));
                            }
                            if self.saw_codestream {
                                return self
                                    .fail(Error::InvalidBox("jxll box after codestream box"));
                            }
                            if header.content_size != Some(1) {
                                return self.fail(Error::InvalidBoxSize);
                            }
                            self.saw_jxll = true;
                            pos += header_len;
                            self.state = ParserState::InLevelBox;
                        }
                        b"jxli" => {
                            if self.saw_jxli {
                                return self.fail(Error::InvalidBox("multiple jxli boxes"));
                            }
                            self.saw_jxli = true;
                            pos += header_len;
                            self.state = ParserState::InAuxBox {
                                bytes_left: header.content_size,
                            };
                        }
                        b"jxlc" => {
                            if self.saw_jxlc || self.next_jxlp_index != 0 {
                                return self.fail(Error::InvalidBox("multiple codestream boxes"));
                            }
                            self.saw_jxlc = true;
                            self.saw_codestream = true;
                            pos += header_len;
                            self.state = ParserState::InCodestream {
                                bytes_left: header.content_size,
                            };
                        }
                        b"jxlp" => {
                            if self.saw_jxlc {
                                return self.fail(Error::InvalidBox("jxlp box after jxlc box"));
                            }
                            if self.jxlp_finished {
                                return self.fail(Error::InvalidBox("jxlp box after final jxlp"));
                            }
                            // The partial codestream index is part of the box
                            // payload; wait until it is available.
                            let Some(index_bytes) = buf.get(header_len..header_len + 4) else {
                                return Ok(pos);
                            };
                            let index =
                                u32::from_be_bytes(index_bytes.try_into().unwrap());
                            let is_last = index & 0x8000_0000 != 0;
                            let index = index & 0x7fff_ffff;
                            if index != self.next_jxlp_index {
                                tracing::error!(
                                    index,
                                    expected = self.next_jxlp_index,
                                    "out-of-order jxlp box"
                                );
                                return self.fail(Error::InvalidBox("out-of-order jxlp box"));
                            }
                            self.next_jxlp_index += 1;
                            self.jxlp_finished = is_last;
                            self.saw_codestream = true;
                            let bytes_left = match header.content_size {
                                Some(size) => Some(
                                    size.checked_sub(4).ok_or(Error::InvalidBoxSize)?,
                                ),
                                None => None,
                            };
                            pos += header_len + 4;
                            self.state = ParserState::InCodestream { bytes_left };
                        }
                        b"brob" => {
                            let Some(inner) = buf.get(header_len..header_len + 4) else {
                                return Ok(pos);
                            };
                            if inner.starts_with(b"jxl") || inner == b"brob" {
                                return self.fail(Error::BrotliBox);
                            }
                            let bytes_left = match header.content_size {
                                Some(size) => Some(
                                    size.checked_sub(4).ok_or(Error::InvalidBoxSize)?,
                                ),
                                None => None,
                            };
                            pos += header_len + 4;
                            self.state = ParserState::InAuxBox { bytes_left };
                        }
                        _ => {
                            pos += header_len;
                            self.state = ParserState::InAuxBox {
                                bytes_left: header.content_size,
                            };
                        }
                    }
                }
                ParserState::InCodestream { bytes_left } => match bytes_left {
                    None => {
                        codestream.extend_from_slice(buf);
                        return Ok(input.len());
                    }
                    Some(left) => {
                        let take = (*left).min(buf.len() as u64) as usize;
                        codestream.extend_from_slice(&buf[..take]);
                        *left -= take as u64;
                        pos += take;
                        if *left > 0 {
                            return Ok(pos);
                        }
                        if self.saw_jxlc || self.jxlp_finished {
                            self.codestream_complete = true;
                        }
                        self.state = ParserState::WaitingBoxHeader;
                    }
                },
                ParserState::InAuxBox { bytes_left } => match bytes_left {
                    None => return Ok(input.len()),
                    Some(left) => {
                        let take = (*left).min(buf.len() as u64) as usize;
                        *left -= take as u64;
                        pos += take;
                        if *left > 0 {
                            return Ok(pos);
                        }
                        self.state = ParserState::WaitingBoxHeader;
                    }
                },
                ParserState::InLevelBox => {
                    let Some(&level) = buf.first() else {
                        return Ok(pos);
                    };
                    match level {
                        5 => {}
                        10 => return self.fail(Error::Unsupported("codestream level 10")),
                        _ => return self.fail(Error::InvalidBox("unknown codestream level")),
                    }
                    pos += 1;
                    self.state = ParserState::WaitingBoxHeader;
                }
                ParserState::Invalid => return Err(Error::InvalidSignature),
            }
        }
    }

    fn fail(&mut self, err: Error) -> Result<usize> {
        self.state = ParserState::Invalid;
        Err(err)
    }
}

struct BoxHeader {
    ty: [u8; 4],
    /// Payload size; `None` means the box extends to the end of the file.
    content_size: Option<u64>,
}

impl BoxHeader {
    /// Parses a box header from the start of `buf`, returning the header and
    /// its encoded length, or `None` if more input is needed.
    fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(head) = buf.get(..8) else {
            return Ok(None);
        };
        let size32 = u32::from_be_bytes(head[..4].try_into().unwrap());
        let ty = <[u8; 4]>::try_from(&head[4..8]).unwrap();

        let (content_size, header_len) = match size32 {
            0 => (None, 8),
            1 => {
                let Some(ext) = buf.get(8..16) else {
                    return Ok(None);
                };
                let size64 = u64::from_be_bytes(ext.try_into().unwrap());
                let content = size64.checked_sub(16).ok_or(Error::InvalidBoxSize)?;
                (Some(content), 16)
            }
            _ => {
                let content = u64::from(size32)
                    .checked_sub(8)
                    .ok_or(Error::InvalidBoxSize)?;
                (Some(content), 8)
            }
        };
        Ok(Some((Self { ty, content_size }, header_len)))
    }
}

fn prefix_matches(buf: &[u8], expected: &[u8]) -> bool {
    let check_len = buf.len().min(expected.len());
    buf[..check_len] == expected[..check_len]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap_jxlc(codestream: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&CONTAINER_SIGNATURE);
        out.extend_from_slice(&FTYP_BOX);
        out.extend_from_slice(&(codestream.len() as u32 + 8).to_be_bytes());
        out.extend_from_slice(b"jxlc");
        out.extend_from_slice(codestream);
        out
    }

    #[test]
    fn bare_codestream_passes_through() {
        let input = [0xff, 0x0a, 1, 2, 3];
        let mut parser = ContainerParser::new();
        let mut codestream = Vec::new();
        let consumed = parser.feed(&input, &mut codestream).unwrap();
        assert_eq!(consumed, 5);
        assert_eq!(codestream, input);
        assert_eq!(parser.kind(), BitstreamKind::BareCodestream);
    }

    #[test]
    fn container_unwraps_jxlc() {
        let input = wrap_jxlc(&[0xff, 0x0a, 0xaa, 0xbb]);
        let mut parser = ContainerParser::new();
        let mut codestream = Vec::new();
        let consumed = parser.feed(&input, &mut codestream).unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(codestream, [0xff, 0x0a, 0xaa, 0xbb]);
        assert_eq!(parser.kind(), BitstreamKind::Container);
        assert!(parser.codestream_complete());
    }

    #[test]
    fn split_feed_resumes_mid_header() {
        let input = wrap_jxlc(&[0xff, 0x0a, 0x12, 0x34]);
        let mut parser = ContainerParser::new();
        let mut codestream = Vec::new();

        // Split in the middle of the jxlc box header.
        let split = CONTAINER_SIGNATURE.len() + FTYP_BOX.len() + 3;
        let consumed = parser.feed(&input[..split], &mut codestream).unwrap();
        assert_eq!(consumed, CONTAINER_SIGNATURE.len() + FTYP_BOX.len());

        let consumed2 = parser.feed(&input[consumed..], &mut codestream).unwrap();
        assert_eq!(consumed + consumed2, input.len());
        assert_eq!(codestream, [0xff, 0x0a, 0x12, 0x34]);
    }

    #[test]
    fn jxlp_indices_must_be_sequential() {
        let mut input = Vec::new();
        input.extend_from_slice(&CONTAINER_SIGNATURE);
        input.extend_from_slice(&FTYP_BOX);
        input.extend_from_slice(&12u32.to_be_bytes());
        input.extend_from_slice(b"jxlp");
        input.extend_from_slice(&1u32.to_be_bytes()); // should start at 0

        let mut parser = ContainerParser::new();
        let mut codestream = Vec::new();
        assert!(parser.feed(&input, &mut codestream).is_err());
    }

    #[test]
    fn brotli_codestream_box_is_rejected() {
        let mut input = Vec::new();
        input.extend_from_slice(&CONTAINER_SIGNATURE);
        input.extend_from_slice(&FTYP_BOX);
        input.extend_from_slice(&16u32.to_be_bytes());
        input.extend_from_slice(b"brob");
        input.extend_from_slice(b"jxlc");
        input.extend_from_slice(&[0u8; 4]);

        let mut parser = ContainerParser::new();
        let mut codestream = Vec::new();
        assert!(matches!(
            parser.feed(&input, &mut codestream),
            Err(Error::BrotliBox)
        ));
    }

    #[test]
    fn bad_signature_is_invalid() {
        let mut parser = ContainerParser::new();
        let mut codestream = Vec::new();
        assert!(matches!(
            parser.feed(&[0xff, 0x00], &mut codestream),
            Err(Error::InvalidSignature)
        ));
        assert_eq!(parser.kind(), BitstreamKind::Invalid);
    }
}
