//! jxl-hematite: a self-contained JPEG XL still-image decoder.
//!
//! [`JxlDecoder`] accepts bytes of either a bare codestream or a BMFF-style
//! container and decodes the first (and only) frame to 8-bit RGBA. Decoding
//! is resumable: [`advance`](JxlDecoder::advance) makes as much progress as
//! the supplied bytes allow, reports [`Progress::NeedMoreData`] on a short
//! read, and can be called again after more input arrives.
//!
//! ```no_run
//! # fn main() -> Result<(), jxl_hematite::Error> {
//! let data = std::fs::read("image.jxl").expect("read file");
//! let mut decoder = jxl_hematite::JxlDecoder::from_memory(&data)?;
//! decoder.advance()?;
//! let pixels = decoder.pixels().expect("frame is decoded");
//! println!("{}x{} RGBA", pixels.width, pixels.height);
//! # Ok(())
//! # }
//! ```

use hematite_bitstream::{Bitstream, BitstreamKind, Bookmark, Bundle, ContainerParser};
use hematite_frame::data::{
    decode_pass_group, HfGlobal, HfGlobalParams, LfGlobal, LfGlobalParams, LfGroup, LfGroupParams,
    PassGroupParams, PassGroupVarDct,
};
use hematite_frame::{Encoding, FrameHeader, Section, SectionKind, Toc};
use hematite_grid::SimpleGrid;
use hematite_image::{BitDepth, ImageHeader};
use hematite_render::FrameBuffer;

/// Top-level decoder error.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    Bitstream(hematite_bitstream::Error),
    Coding(hematite_coding::Error),
    Frame(hematite_frame::Error),
    Render(hematite_render::Error),
    /// The input ended before the codestream was complete.
    Truncated,
    /// A previous call already failed; the decoder is latched on that error.
    AlreadyFailed,
}

impl Error {
    fn unexpected_eof(&self) -> bool {
        match self {
            Self::Bitstream(e) => e.unexpected_eof(),
            Self::Coding(e) => e.unexpected_eof(),
            Self::Frame(e) => e.unexpected_eof(),
            Self::Render(e) => e.unexpected_eof(),
            _ => false,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bitstream(e) => Some(e),
            Self::Coding(e) => Some(e),
            Self::Frame(e) => Some(e),
            Self::Render(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitstream(e) => write!(f, "{e}"),
            Self::Coding(e) => write!(f, "{e}"),
            Self::Frame(e) => write!(f, "{e}"),
            Self::Render(e) => write!(f, "{e}"),
            Self::Truncated => write!(f, "input ended before the codestream was complete"),
            Self::AlreadyFailed => write!(f, "decoder already failed"),
        }
    }
}

impl From<hematite_bitstream::Error> for Error {
    fn from(e: hematite_bitstream::Error) -> Self {
        Self::Bitstream(e)
    }
}

impl From<hematite_coding::Error> for Error {
    fn from(e: hematite_coding::Error) -> Self {
        Self::Coding(e)
    }
}

impl From<hematite_frame::Error> for Error {
    fn from(e: hematite_frame::Error) -> Self {
        Self::Frame(e)
    }
}

impl From<hematite_modular::Error> for Error {
    fn from(e: hematite_modular::Error) -> Self {
        Self::Frame(hematite_frame::Error::Modular(e))
    }
}

impl From<hematite_render::Error> for Error {
    fn from(e: hematite_render::Error) -> Self {
        Self::Render(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of one [`JxlDecoder::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Decoding is paused on a short read; feed more bytes and call again.
    NeedMoreData,
    /// The frame is fully decoded; pixels are available.
    FrameReady,
}

/// Borrowed view of the decoded pixels: rows of `4 * width` bytes in
/// R, G, B, A order.
#[derive(Debug, Clone, Copy)]
pub struct PixelView<'a> {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: &'a [u8],
}

#[derive(Debug)]
enum Stage {
    ImageHeader,
    IccStream,
    FrameHeader,
    Sections,
    Render,
    Done,
}

#[derive(Debug)]
struct FrameState {
    header: FrameHeader,
    toc: Toc,
    /// Byte offset of the first section within the codestream.
    body_base: usize,
    next_section: usize,
    lf_global: Option<LfGlobal>,
    lf_groups: Vec<Option<LfGroup>>,
    hf_global: Option<HfGlobal>,
    group_coeffs: Vec<Option<[SimpleGrid<i32>; 3]>>,
}

/// A resumable JPEG XL decoder.
#[derive(Debug)]
pub struct JxlDecoder {
    container: ContainerParser,
    pending: Vec<u8>,
    codestream: Vec<u8>,
    input_complete: bool,
    stage: Stage,
    checkpoint: Bookmark,
    image_header: Option<ImageHeader>,
    frame: Option<FrameState>,
    framebuffer: Option<FrameBuffer>,
    error: Option<Error>,
}

impl Default for JxlDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl JxlDecoder {
    pub fn new() -> Self {
        Self {
            container: ContainerParser::new(),
            pending: Vec::new(),
            codestream: Vec::new(),
            input_complete: false,
            stage: Stage::ImageHeader,
            checkpoint: Bookmark::default(),
            image_header: None,
            frame: None,
            framebuffer: None,
            error: None,
        }
    }

    /// Creates a decoder over a complete in-memory image.
    pub fn from_memory(data: &[u8]) -> Result<Self> {
        let mut decoder = Self::new();
        decoder.feed_bytes(data)?;
        decoder.finish_input();
        Ok(decoder)
    }

    /// Feeds input bytes into the container layer.
    pub fn feed_bytes(&mut self, data: &[u8]) -> Result<()> {
        if let Some(error) = &self.error {
            tracing::debug!(%error, "feed_bytes called on failed decoder");
            return Err(Error::AlreadyFailed);
        }

        self.pending.extend_from_slice(data);
        match self.container.feed(&self.pending, &mut self.codestream) {
            Ok(consumed) => {
                self.pending.drain(..consumed);
                Ok(())
            }
            Err(e) => Err(self.latch(e.into())),
        }
    }

    /// Declares that no more input will arrive; a pending short read then
    /// becomes a fatal truncation.
    pub fn finish_input(&mut self) {
        self.input_complete = true;
    }

    /// Drives decoding as far as the input allows.
    ///
    /// All errors other than [`Progress::NeedMoreData`]-producing short
    /// reads are latched: once a fatal error is returned, every further
    /// call fails.
    pub fn advance(&mut self) -> Result<Progress> {
        if self.error.is_some() {
            return Err(Error::AlreadyFailed);
        }
        match self.advance_inner() {
            Ok(progress) => Ok(progress),
            Err(e) if e.unexpected_eof() => {
                if self.input_complete {
                    Err(self.latch(Error::Truncated))
                } else {
                    Ok(Progress::NeedMoreData)
                }
            }
            Err(e) => Err(self.latch(e)),
        }
    }

    /// Parsed image header, once the codestream got that far.
    pub fn image_header(&self) -> Option<&ImageHeader> {
        self.image_header.as_ref()
    }

    /// The decoded frame, once [`advance`](Self::advance) returned
    /// [`Progress::FrameReady`].
    pub fn pixels(&self) -> Option<PixelView<'_>> {
        self.framebuffer.as_ref().map(|fb| PixelView {
            width: fb.width(),
            height: fb.height(),
            stride: fb.stride(),
            data: fb.data(),
        })
    }

    /// The latched fatal error, if any.
    pub fn last_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn latch(&mut self, error: Error) -> Error {
        self.error = Some(error.clone());
        error
    }

    fn advance_inner(&mut self) -> Result<Progress> {
        loop {
            match self.stage {
                Stage::ImageHeader => self.parse_image_header()?,
                Stage::IccStream => self.skip_icc()?,
                Stage::FrameHeader => self.parse_frame_header()?,
                Stage::Sections => self.decode_sections()?,
                Stage::Render => self.render()?,
                Stage::Done => return Ok(Progress::FrameReady),
            }
        }
    }

    fn bitstream_at_checkpoint(&self) -> Result<Bitstream<'_>> {
        let mut bitstream = Bitstream::new(&self.codestream);
        bitstream.skip_to_bookmark(self.checkpoint)?;
        Ok(bitstream)
    }

    fn parse_image_header(&mut self) -> Result<()> {
        if self.container.kind() == BitstreamKind::Unknown {
            // Not even the signature is decided yet.
            return Err(hematite_bitstream::Error::ShortRead.into());
        }

        let mut bitstream = Bitstream::new(&self.codestream);
        let header = ImageHeader::parse(&mut bitstream, ())?;
        check_image_supported(&header)?;

        let want_icc = header.metadata.colour_encoding.want_icc;
        self.checkpoint = bitstream.bookmark();
        self.image_header = Some(header);
        self.stage = if want_icc {
            Stage::IccStream
        } else {
            Stage::FrameHeader
        };
        Ok(())
    }

    fn skip_icc(&mut self) -> Result<()> {
        let mut bitstream = self.bitstream_at_checkpoint()?;
        // The profile payload is not interpreted, but the stream must be
        // decoded to find the frame that follows it.
        let icc = hematite_color::icc::read_icc(&mut bitstream)?;
        tracing::debug!(icc_len = icc.len(), "skipped ICC stream");
        self.checkpoint = bitstream.bookmark();
        self.stage = Stage::FrameHeader;
        Ok(())
    }

    fn parse_frame_header(&mut self) -> Result<()> {
        let image_header = self.image_header.as_ref().unwrap();
        let mut bitstream = self.bitstream_at_checkpoint()?;
        bitstream.zero_pad_to_byte()?;

        let header = FrameHeader::parse(&mut bitstream, image_header)?;
        header.check_supported()?;
        if header.have_crop
            && (header.x0 != 0
                || header.y0 != 0
                || header.width != image_header.size.width
                || header.height != image_header.size.height)
        {
            return Err(hematite_bitstream::Error::Unsupported("frame crop").into());
        }
        let toc = Toc::parse(&mut bitstream, &header)?;

        debug_assert_eq!(bitstream.num_read_bits() % 8, 0);
        let body_base = (bitstream.num_read_bits() / 8) as usize;
        let num_lf_groups = header.num_lf_groups() as usize;
        let num_groups = header.num_groups() as usize;

        self.checkpoint = bitstream.bookmark();
        self.frame = Some(FrameState {
            header,
            toc,
            body_base,
            next_section: 0,
            lf_global: None,
            lf_groups: (0..num_lf_groups).map(|_| None).collect(),
            hf_global: None,
            group_coeffs: (0..num_groups).map(|_| None).collect(),
        });
        self.stage = Stage::Sections;
        Ok(())
    }

    fn decode_sections(&mut self) -> Result<()> {
        let image_header = self.image_header.as_ref().unwrap();
        let frame = self.frame.as_mut().unwrap();

        let plan: Vec<Section> = frame.toc.decode_order().copied().collect();
        while frame.next_section < plan.len() {
            let section = plan[frame.next_section];
            let start = frame.body_base + section.offset as usize;
            let end = start + section.size as usize;
            if end > self.codestream.len() {
                return Err(hematite_bitstream::Error::ShortRead.into());
            }

            let data = &self.codestream[start..end];
            decode_section(image_header, frame, section.kind, data).map_err(|e: Error| {
                // Running out of bits inside a complete section is stream
                // corruption, not a recoverable short read.
                if e.unexpected_eof() {
                    Error::Bitstream(hematite_bitstream::Error::ValidationFailed(
                        "section overran its size",
                    ))
                } else {
                    e
                }
            })?;
            frame.next_section += 1;
        }

        self.stage = Stage::Render;
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let image_header = self.image_header.as_ref().unwrap();
        let frame = self.frame.as_mut().unwrap();

        let lf_global = frame
            .lf_global
            .as_mut()
            .ok_or(hematite_render::Error::IncompleteFrame("missing LfGlobal"))?;
        lf_global.gmodular.modular.inverse_transform()?;

        let lf_groups: Vec<LfGroup> = {
            let mut out = Vec::with_capacity(frame.lf_groups.len());
            for lf_group in frame.lf_groups.drain(..) {
                out.push(lf_group.ok_or(hematite_render::Error::IncompleteFrame(
                    "missing LF group",
                ))?);
            }
            out
        };

        let framebuffer = hematite_render::render_frame(hematite_render::RenderParams {
            image_header,
            frame_header: &frame.header,
            lf_global,
            lf_groups: &lf_groups,
            hf_global: frame.hf_global.as_ref(),
            group_coeffs: &frame.group_coeffs,
        })?;

        self.framebuffer = Some(framebuffer);
        self.stage = Stage::Done;
        Ok(())
    }
}

fn check_image_supported(header: &ImageHeader) -> Result<()> {
    let metadata = &header.metadata;
    let unsupported =
        |what: &'static str| -> Error { hematite_bitstream::Error::Unsupported(what).into() };

    if metadata.animation.is_some() {
        return Err(unsupported("animation"));
    }
    if metadata.preview.is_some() {
        return Err(unsupported("preview frame"));
    }
    match metadata.bit_depth {
        BitDepth::Float { .. } => return Err(unsupported("float samples")),
        BitDepth::Integer { bits_per_sample } => {
            if bits_per_sample > 16 {
                return Err(unsupported("more than 16 bits per sample"));
            }
            if bits_per_sample == 0 {
                return Err(Error::Bitstream(
                    hematite_bitstream::Error::ValidationFailed("zero bits per sample"),
                ));
            }
        }
    }
    if !metadata.modular_16bit_buffers {
        return Err(unsupported("32-bit modular buffers"));
    }
    for ec_info in &metadata.ec_info {
        if ec_info.bit_depth.is_float() {
            return Err(unsupported("float samples"));
        }
    }
    Ok(())
}

fn decode_section(
    image_header: &ImageHeader,
    frame: &mut FrameState,
    kind: SectionKind,
    data: &[u8],
) -> Result<()> {
    let mut bitstream = Bitstream::new(data);
    match kind {
        SectionKind::All => {
            decode_lf_global(image_header, frame, &mut bitstream)?;
            decode_lf_group(image_header, frame, &mut bitstream, 0)?;
            if frame.header.encoding == Encoding::VarDct {
                decode_hf_global(image_header, frame, &mut bitstream)?;
            }
            decode_group_pass(frame, &mut bitstream, 0, 0)?;
        }
        SectionKind::LfGlobal => decode_lf_global(image_header, frame, &mut bitstream)?,
        SectionKind::LfGroup(idx) => decode_lf_group(image_header, frame, &mut bitstream, idx)?,
        SectionKind::HfGlobal => {
            // Modular frames have an (empty) HfGlobal slot in the TOC.
            if frame.header.encoding == Encoding::VarDct {
                decode_hf_global(image_header, frame, &mut bitstream)?;
            }
        }
        SectionKind::GroupPass {
            pass_idx,
            group_idx,
        } => decode_group_pass(frame, &mut bitstream, pass_idx, group_idx)?,
    }
    Ok(())
}

fn decode_lf_global(
    image_header: &ImageHeader,
    frame: &mut FrameState,
    bitstream: &mut Bitstream,
) -> Result<()> {
    let lf_global = LfGlobal::parse(
        bitstream,
        LfGlobalParams {
            image_header,
            frame_header: &frame.header,
        },
    )?;
    frame.lf_global = Some(lf_global);
    Ok(())
}

fn decode_lf_group(
    image_header: &ImageHeader,
    frame: &mut FrameState,
    bitstream: &mut Bitstream,
    lf_group_idx: u32,
) -> Result<()> {
    let lf_global = frame
        .lf_global
        .as_ref()
        .ok_or(hematite_render::Error::IncompleteFrame("missing LfGlobal"))?;
    let lf_group = LfGroup::parse(
        bitstream,
        LfGroupParams {
            frame_header: &frame.header,
            global_ma_config: lf_global.gmodular.ma_config.as_ref(),
            quantizer_global_scale: lf_global
                .vardct
                .as_ref()
                .map(|vardct| vardct.quantizer.global_scale),
            lf_group_idx,
            bits_per_sample: image_header.metadata.bit_depth.bits_per_sample(),
        },
    )?;
    frame.lf_groups[lf_group_idx as usize] = Some(lf_group);
    Ok(())
}

fn decode_hf_global(
    image_header: &ImageHeader,
    frame: &mut FrameState,
    bitstream: &mut Bitstream,
) -> Result<()> {
    let lf_global = frame
        .lf_global
        .as_ref()
        .ok_or(hematite_render::Error::IncompleteFrame("missing LfGlobal"))?;
    let hf_global = HfGlobal::parse(
        bitstream,
        HfGlobalParams {
            image_header,
            frame_header: &frame.header,
            lf_global,
        },
    )?;
    frame.hf_global = Some(hf_global);
    Ok(())
}

fn decode_group_pass(
    frame: &mut FrameState,
    bitstream: &mut Bitstream,
    pass_idx: u32,
    group_idx: u32,
) -> Result<()> {
    let frame_header = &frame.header;
    let lf_global = frame
        .lf_global
        .as_mut()
        .ok_or(hematite_render::Error::IncompleteFrame("missing LfGlobal"))?;
    let lf_group_idx = frame_header.lf_group_idx_from_group_idx(group_idx);
    let lf_group = frame.lf_groups[lf_group_idx as usize]
        .as_ref()
        .ok_or(hematite_render::Error::IncompleteFrame("missing LF group"))?;

    let is_vardct = frame_header.encoding == Encoding::VarDct;
    let mut coeff_out = if is_vardct {
        let (group_width, group_height) = frame_header.group_size_for(group_idx);
        let w8 = group_width.div_ceil(8) as usize;
        let h8 = group_height.div_ceil(8) as usize;
        Some(
            frame.group_coeffs[group_idx as usize]
                .take()
                .unwrap_or_else(|| std::array::from_fn(|_| SimpleGrid::new(w8 * 8, h8 * 8))),
        )
    } else {
        None
    };

    let vardct = match (&lf_global.vardct, &frame.hf_global) {
        (Some(lf_vardct), Some(hf_global)) => Some(PassGroupVarDct {
            lf_vardct,
            hf_global,
        }),
        _ => None,
    };

    let ma_config = lf_global.gmodular.ma_config.clone();
    decode_pass_group(
        bitstream,
        PassGroupParams {
            frame_header,
            lf_group,
            pass_idx,
            group_idx,
            global_ma_config: ma_config.as_ref(),
            vardct,
        },
        coeff_out.as_mut(),
        &mut lf_global.gmodular.modular,
    )?;

    if let Some(coeff_out) = coeff_out {
        frame.group_coeffs[group_idx as usize] = Some(coeff_out);
    }
    Ok(())
}
