//! The output framebuffer: 8-bit RGBA with orientation applied.

use hematite_grid::SimpleGrid;
use hematite_image::ImageMetadata;

/// An 8-bit RGBA frame, rows packed without padding.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameBuffer {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes.
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Packs colour planes (values in `[0, 1]`, possibly padded beyond the
    /// image size) and an optional alpha plane into RGBA, applying the
    /// image orientation.
    pub fn compose(
        planes: &[SimpleGrid<f32>; 3],
        alpha: Option<&SimpleGrid<f32>>,
        metadata: &ImageMetadata,
        width: u32,
        height: u32,
    ) -> Self {
        let (out_width, out_height) = metadata.oriented_size(width, height);
        let mut data = vec![0u8; out_width as usize * out_height as usize * 4];

        for out_y in 0..out_height {
            for out_x in 0..out_width {
                let (src_x, src_y) = metadata.source_position(width, height, out_x, out_y);
                let src_x = src_x as usize;
                let src_y = src_y as usize;
                let base = (out_y as usize * out_width as usize + out_x as usize) * 4;
                for (c, plane) in planes.iter().enumerate() {
                    data[base + c] = quantize_u8(*plane.get(src_x, src_y).unwrap());
                }
                data[base + 3] = match alpha {
                    Some(alpha) => quantize_u8(*alpha.get(src_x, src_y).unwrap()),
                    None => 255,
                };
            }
        }

        Self {
            width: out_width,
            height: out_height,
            data,
        }
    }
}

#[inline]
fn quantize_u8(value: f32) -> u8 {
    (value * 255.0 + 0.5).clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_rounds_and_clamps() {
        assert_eq!(quantize_u8(0.0), 0);
        assert_eq!(quantize_u8(1.0), 255);
        assert_eq!(quantize_u8(-0.5), 0);
        assert_eq!(quantize_u8(2.0), 255);
        assert_eq!(quantize_u8(0.5), 128);
    }

    #[test]
    fn compose_crops_padded_planes() {
        let mut plane = SimpleGrid::<f32>::new(8, 8);
        *plane.get_mut(0, 0).unwrap() = 1.0;
        let planes = [plane.clone(), plane.clone(), plane];
        let metadata = ImageMetadata::default();

        let fb = FrameBuffer::compose(&planes, None, &metadata, 3, 2);
        assert_eq!(fb.width(), 3);
        assert_eq!(fb.height(), 2);
        assert_eq!(fb.data().len(), 24);
        assert_eq!(&fb.data()[..4], [255, 255, 255, 255]);
        assert_eq!(&fb.data()[4..8], [0, 0, 0, 255]);
    }

    #[test]
    fn compose_rotates() {
        // Orientation 6 rotates 90 degrees clockwise.
        let mut plane = SimpleGrid::<f32>::new(2, 1);
        *plane.get_mut(0, 0).unwrap() = 1.0;
        let planes = [plane.clone(), plane.clone(), plane];
        let metadata = ImageMetadata {
            orientation: 6,
            ..Default::default()
        };

        let fb = FrameBuffer::compose(&planes, None, &metadata, 2, 1);
        assert_eq!((fb.width(), fb.height()), (1, 2));
        // The bright pixel was at (0, 0); rotated clockwise it lands at
        // (0, 0) of the 1x2 output.
        assert_eq!(&fb.data()[..4], [255, 255, 255, 255]);
    }
}
