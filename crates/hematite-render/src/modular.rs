//! Conversion of decoded Modular channels into floating-point planes.

use hematite_frame::data::LfGlobal;
use hematite_frame::FrameHeader;
use hematite_grid::SimpleGrid;
use hematite_image::{BitDepth, ImageHeader};
use hematite_modular::Channel;

use crate::{Error, Result};

/// Converts the colour channels of a Modular frame into `[X, Y, B]` (for
/// XYB-encoded images) or `[R, G, B]` planes.
pub fn render_modular(
    image_header: &ImageHeader,
    frame_header: &FrameHeader,
    lf_global: &LfGlobal,
) -> Result<[SimpleGrid<f32>; 3]> {
    let span = tracing::span!(tracing::Level::TRACE, "render modular");
    let _guard = span.enter();

    let metadata = &image_header.metadata;
    let channels = lf_global.gmodular.modular.channels();
    let color_channels = channels
        .get(..frame_header.encoded_color_channels)
        .ok_or(Error::IncompleteFrame("missing colour channels"))?;

    if metadata.xyb_encoded {
        // XYB Modular stores channels as Y, X, B with the B channel offset
        // by Y, quantized by the LF dequantization scales.
        let [ch_y, ch_x, ch_b] = color_channels else {
            return Err(Error::IncompleteFrame("XYB frame without three channels"));
        };
        let lf_dequant = &lf_global.lf_dequant;
        let scale_x = lf_dequant.m_x_lf / 128.0;
        let scale_y = lf_dequant.m_y_lf / 128.0;
        let scale_b = lf_dequant.m_b_lf / 128.0;

        let mut planes: [SimpleGrid<f32>; 3] = std::array::from_fn(|_| {
            SimpleGrid::new(ch_y.width as usize, ch_y.height as usize)
        });
        let [px, py, pb] = &mut planes;
        for (((px, py), pb), ((sy, sx), sb)) in px
            .buf_mut()
            .iter_mut()
            .zip(py.buf_mut())
            .zip(pb.buf_mut())
            .zip(
                ch_y.grid
                    .buf()
                    .iter()
                    .zip(ch_x.grid.buf())
                    .zip(ch_b.grid.buf()),
            )
        {
            *px = *sx as f32 * scale_x;
            *py = *sy as f32 * scale_y;
            *pb = (*sb + *sy) as f32 * scale_b;
        }
        Ok(planes)
    } else {
        let bit_depth = metadata.bit_depth;
        let mut it = color_channels.iter();
        let first = it.next().unwrap();
        let first = channel_to_plane(first, bit_depth)?;
        let mut planes = [first.clone(), first.clone(), first];
        for (plane, channel) in planes.iter_mut().skip(1).zip(it) {
            *plane = channel_to_plane(channel, bit_depth)?;
        }
        Ok(planes)
    }
}

/// Converts one integer channel to floats scaled into `[0, 1]`.
pub fn channel_to_plane(channel: &Channel, bit_depth: BitDepth) -> Result<SimpleGrid<f32>> {
    if bit_depth.is_float() {
        return Err(hematite_bitstream::Error::Unsupported("float samples").into());
    }
    let max_value = ((1u64 << bit_depth.bits_per_sample()) - 1) as f32;

    let mut plane = SimpleGrid::new(channel.width as usize, channel.height as usize);
    for (out, &sample) in plane.buf_mut().iter_mut().zip(channel.grid.buf()) {
        *out = sample as f32 / max_value;
    }
    Ok(plane)
}
