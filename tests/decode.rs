//! End-to-end decoding of hand-assembled codestreams.

use jxl_hematite::{JxlDecoder, Progress};

/// LSB-first bit assembler matching the codestream bit order.
struct BitWriter {
    bytes: Vec<u8>,
    bit_pos: usize,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit_pos: 0,
        }
    }

    fn put(&mut self, value: u32, n: usize) {
        for bit in 0..n {
            if self.bit_pos % 8 == 0 {
                self.bytes.push(0);
            }
            if value & (1 << bit) != 0 {
                *self.bytes.last_mut().unwrap() |= 1 << (self.bit_pos % 8);
            }
            self.bit_pos += 1;
        }
    }

    fn pad_to_byte(&mut self) {
        while self.bit_pos % 8 != 0 {
            self.put(0, 1);
        }
    }
}

/// Builds a bare codestream for a 1x1 sRGB image with an alpha channel and
/// constant pixel value {255, 0, 0, 255}, coded as a Modular frame.
fn red_pixel_codestream() -> Vec<u8> {
    let mut w = BitWriter::new();

    // Signature and 1x1 size header (ratio 1: square).
    w.put(0x0aff, 16);
    w.put(0, 1); // div8
    w.put(0, 2); // height selector: 1 + u(9)
    w.put(0, 9);
    w.put(1, 3); // ratio = 1

    // Metadata: 8-bit samples, one default (unassociated) alpha channel,
    // not XYB, sRGB colour encoding.
    w.put(0, 1); // all_default
    w.put(0, 1); // extra_fields
    w.put(0, 1); // bit_depth: integer
    w.put(0, 2); // 8 bits per sample
    w.put(1, 1); // modular_16bit_buffers
    w.put(1, 2); // num_extra = 1
    w.put(1, 1); // default alpha channel
    w.put(0, 1); // xyb_encoded = false
    w.put(1, 1); // colour encoding all_default (sRGB)
    w.put(0, 2); // extensions: U64 = 0
    w.put(1, 1); // default_m

    // The frame starts at a byte boundary.
    w.pad_to_byte();

    // Frame header: Modular, single regular last frame, default filters.
    w.put(0, 1); // all_default
    w.put(0, 2); // frame_type: regular
    w.put(1, 1); // encoding: modular
    w.put(0, 2); // flags: U64 = 0
    w.put(0, 1); // do_ycbcr
    w.put(0, 2); // upsampling = 1
    w.put(0, 2); // ec_upsampling[0] = 1
    w.put(1, 2); // group_size_shift = 1
    w.put(0, 2); // num_passes = 1
    w.put(0, 1); // have_crop
    w.put(0, 2); // blending mode: replace
    w.put(0, 2); // ec blending mode: replace
    w.put(1, 1); // is_last
    w.put(0, 2); // name: empty
    w.put(1, 1); // restoration filter: all_default
    w.put(0, 2); // frame extensions: U64 = 0

    let section = red_pixel_section();

    // TOC: single implicit section.
    w.put(0, 1); // not permuted
    w.pad_to_byte();
    w.put(0, 2); // size selector: u(10)
    w.put(section.len() as u32, 10);
    w.pad_to_byte();

    w.bytes.extend_from_slice(&section);
    w.bytes
}

/// The single frame section: LfGlobal (trivial) plus the global Modular
/// image holding four 1x1 channels (R, G, B, A).
fn red_pixel_section() -> Vec<u8> {
    let mut w = BitWriter::new();

    // LfGlobal: default LF dequantization, no global MA tree.
    w.put(1, 1); // lf_dequant all_default
    w.put(0, 1); // no global tree

    // Modular header of the global image.
    w.put(0, 1); // use_global_tree
    w.put(1, 1); // default weighted predictor params
    w.put(0, 2); // nb_transforms = 0

    // Local MA tree: a single leaf (predictor Zero, offset 0, multiplier 1).
    // Tree distributions: prefix code with a one-symbol alphabet, so every
    // tree token reads zero bits.
    w.put(0, 1); // lz77_enabled
    w.put(1, 1); // cluster map: simple
    w.put(0, 2); // nbits = 0, all six contexts share cluster 0
    w.put(1, 1); // use_prefix_code
    w.put(0, 4); // hybrid integer split_exponent = 0
    w.put(0, 1); // alphabet size: 1

    // Leaf distributions: one context, prefix code over 21 symbols with
    // symbols 0 and 20 at one bit each.
    w.put(0, 1); // lz77_enabled
    w.put(1, 1); // use_prefix_code
    w.put(4, 4); // split_exponent = 4
    w.put(0, 3); // msb_in_token = 0
    w.put(0, 3); // lsb_in_token = 0
    w.put(1, 1); // alphabet size present
    w.put(4, 4); // size exponent: count = 1 + 16 + u(4)
    w.put(4, 4); // count = 21
    w.put(1, 2); // hskip = 1: simple code
    w.put(1, 2); // two symbols
    w.put(0, 5); // symbol 0
    w.put(20, 5); // symbol 20

    // Channel samples. Token 20 expands to 256 + u(8); with residual 254
    // it decodes to 510, which unpacks to +255.
    w.put(1, 1); // R: symbol 20
    w.put(254, 8);
    w.put(0, 1); // G: symbol 0
    w.put(0, 1); // B: symbol 0
    w.put(1, 1); // A: symbol 20
    w.put(254, 8);

    w.pad_to_byte();
    w.bytes
}

/// Wraps a codestream in the BMFF container with a single jxlc box.
fn container_wrap(codestream: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&[
        0x00, 0x00, 0x00, 0x0c, b'J', b'X', b'L', b' ', 0x0d, 0x0a, 0x87, 0x0a,
    ]);
    out.extend_from_slice(&[
        0x00, 0x00, 0x00, 0x14, b'f', b't', b'y', b'p', b'j', b'x', b'l', b' ', 0x00, 0x00, 0x00,
        0x00, b'j', b'x', b'l', b' ',
    ]);
    out.extend_from_slice(&(codestream.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(b"jxlc");
    out.extend_from_slice(codestream);
    out
}

#[test]
fn bare_codestream_red_pixel() {
    let data = red_pixel_codestream();
    let mut decoder = JxlDecoder::from_memory(&data).unwrap();
    assert_eq!(decoder.advance().unwrap(), Progress::FrameReady);

    let pixels = decoder.pixels().unwrap();
    assert_eq!((pixels.width, pixels.height), (1, 1));
    assert_eq!(pixels.data, [255, 0, 0, 255]);

    let header = decoder.image_header().unwrap();
    assert_eq!(header.size.width, 1);
    assert!(!header.metadata.xyb_encoded);
}

#[test]
fn container_wrapped_codestream_matches_bare() {
    let data = container_wrap(&red_pixel_codestream());
    let mut decoder = JxlDecoder::from_memory(&data).unwrap();
    assert_eq!(decoder.advance().unwrap(), Progress::FrameReady);
    assert_eq!(decoder.pixels().unwrap().data, [255, 0, 0, 255]);
}

#[test]
fn short_read_recovers_after_more_input() {
    let data = container_wrap(&red_pixel_codestream());
    let split = data.len() / 2;

    let mut decoder = JxlDecoder::new();
    decoder.feed_bytes(&data[..split]).unwrap();
    assert_eq!(decoder.advance().unwrap(), Progress::NeedMoreData);

    // Feeding the rest resumes from the checkpoint and produces the same
    // output as a single-shot decode.
    decoder.feed_bytes(&data[split..]).unwrap();
    decoder.finish_input();
    assert_eq!(decoder.advance().unwrap(), Progress::FrameReady);
    assert_eq!(decoder.pixels().unwrap().data, [255, 0, 0, 255]);
}

#[test]
fn byte_at_a_time_feeding_decodes() {
    let data = red_pixel_codestream();
    let mut decoder = JxlDecoder::new();
    let mut done = false;
    for &byte in &data {
        decoder.feed_bytes(&[byte]).unwrap();
        if decoder.advance().unwrap() == Progress::FrameReady {
            done = true;
            break;
        }
    }
    assert!(done, "never finished decoding");
    assert_eq!(decoder.pixels().unwrap().data, [255, 0, 0, 255]);
}

#[test]
fn bad_signature_is_latched() {
    let mut decoder = JxlDecoder::new();
    let err = decoder.feed_bytes(&[0xff, 0x00]).unwrap_err();
    assert!(matches!(
        err,
        jxl_hematite::Error::Bitstream(hematite_bitstream::Error::InvalidSignature)
    ));

    // The error is sticky.
    assert!(matches!(
        decoder.advance().unwrap_err(),
        jxl_hematite::Error::AlreadyFailed
    ));
    assert!(decoder.last_error().is_some());
}

#[test]
fn truncated_input_is_fatal() {
    let data = red_pixel_codestream();
    let mut decoder = JxlDecoder::new();
    decoder.feed_bytes(&data[..data.len() - 1]).unwrap();
    decoder.finish_input();
    assert!(matches!(
        decoder.advance().unwrap_err(),
        jxl_hematite::Error::Truncated
    ));
}
