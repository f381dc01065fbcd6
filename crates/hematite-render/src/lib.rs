//! Rendering for jxl-hematite: turns decoded frame data into an 8-bit RGBA
//! framebuffer.

use hematite_color::{tf, xyb, TransferFunction};
use hematite_frame::data::{HfGlobal, LfGlobal, LfGroup};
use hematite_frame::{Encoding, FrameHeader};
use hematite_grid::SimpleGrid;
use hematite_image::ImageHeader;

pub mod dct;
mod error;
mod fb;
mod filters;
mod modular;
mod transform;
mod vardct;

pub use error::{Error, Result};
pub use fb::FrameBuffer;

/// Everything needed to render one decoded frame.
#[derive(Debug)]
pub struct RenderParams<'a> {
    pub image_header: &'a ImageHeader,
    pub frame_header: &'a FrameHeader,
    pub lf_global: &'a LfGlobal,
    pub lf_groups: &'a [LfGroup],
    pub hf_global: Option<&'a HfGlobal>,
    /// Per-group HF coefficients of VarDCT frames, in `[X, Y, B]` order.
    pub group_coeffs: &'a [Option<[SimpleGrid<i32>; 3]>],
}

/// Renders a fully decoded frame to RGBA8.
pub fn render_frame(params: RenderParams<'_>) -> Result<FrameBuffer> {
    let RenderParams {
        image_header,
        frame_header,
        lf_global,
        lf_groups,
        hf_global,
        group_coeffs,
    } = params;
    let metadata = &image_header.metadata;

    let mut planes = if frame_header.encoding == Encoding::VarDct {
        let hf_global =
            hf_global.ok_or(Error::IncompleteFrame("VarDCT frame without HfGlobal"))?;
        vardct::render_vardct(
            image_header,
            frame_header,
            lf_global,
            lf_groups,
            hf_global,
            group_coeffs,
        )?
    } else {
        modular::render_modular(image_header, frame_header, lf_global)?
    };

    filters::apply_gabor(&mut planes, &frame_header.restoration_filter.gabor);
    filters::apply_epf(&mut planes, lf_groups, frame_header);

    if metadata.xyb_encoded {
        let [x, y, b] = &mut planes;
        xyb::xyb_to_linear(
            [x.buf_mut(), y.buf_mut(), b.buf_mut()],
            &metadata.opsin_inverse_matrix,
            metadata.tone_mapping.intensity_target,
        );
        apply_transfer_function(&mut planes, metadata);
    }

    let alpha = alpha_plane(image_header, lf_global)?;
    Ok(FrameBuffer::compose(
        &planes,
        alpha.as_ref(),
        metadata,
        frame_header.width,
        frame_header.height,
    ))
}

fn apply_transfer_function(planes: &mut [SimpleGrid<f32>; 3], metadata: &hematite_image::ImageMetadata) {
    let transfer = metadata.colour_encoding.tf;
    for plane in planes.iter_mut() {
        match transfer {
            TransferFunction::Linear => {}
            TransferFunction::Srgb => tf::linear_to_srgb(plane.buf_mut()),
            TransferFunction::Gamma(gamma) => {
                tf::apply_gamma(plane.buf_mut(), gamma as f32 / 1e7)
            }
            other => {
                // HDR transfer curves render through the sRGB curve; this is
                // the documented SDR approximation.
                tracing::warn!(?other, "unsupported transfer function, using sRGB");
                tf::linear_to_srgb(plane.buf_mut());
            }
        }
    }
}

fn alpha_plane(
    image_header: &ImageHeader,
    lf_global: &LfGlobal,
) -> Result<Option<SimpleGrid<f32>>> {
    let metadata = &image_header.metadata;
    let Some(alpha_idx) = metadata.alpha() else {
        return Ok(None);
    };
    let info = &metadata.ec_info[alpha_idx];
    if info.alpha_associated() {
        return Err(hematite_bitstream::Error::Unsupported("premultiplied alpha").into());
    }

    let channels = lf_global.gmodular.modular.channels();
    let channel = channels
        .get(lf_global.gmodular.extra_channel_from + alpha_idx)
        .ok_or(Error::IncompleteFrame("missing alpha channel"))?;
    modular::channel_to_plane(channel, info.bit_depth).map(Some)
}
