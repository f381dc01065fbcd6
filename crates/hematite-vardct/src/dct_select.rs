/// Varblock transform types.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TransformType {
    Dct8 = 0,
    Hornuss,
    Dct2,
    Dct4,
    Dct16,
    Dct32,
    Dct16x8,
    Dct8x16,
    Dct32x8,
    Dct8x32,
    Dct32x16,
    Dct16x32,
    Dct4x8,
    Dct8x4,
    Afv0,
    Afv1,
    Afv2,
    Afv3,
    Dct64,
    Dct64x32,
    Dct32x64,
    Dct128,
    Dct128x64,
    Dct64x128,
    Dct256,
    Dct256x128,
    Dct128x256,
}

impl TryFrom<i32> for TransformType {
    type Error = hematite_bitstream::Error;

    fn try_from(value: i32) -> Result<Self, hematite_bitstream::Error> {
        use TransformType::*;
        const ALL: [TransformType; 27] = [
            Dct8, Hornuss, Dct2, Dct4, Dct16, Dct32, Dct16x8, Dct8x16, Dct32x8, Dct8x32, Dct32x16,
            Dct16x32, Dct4x8, Dct8x4, Afv0, Afv1, Afv2, Afv3, Dct64, Dct64x32, Dct32x64, Dct128,
            Dct128x64, Dct64x128, Dct256, Dct256x128, Dct128x256,
        ];
        usize::try_from(value)
            .ok()
            .and_then(|idx| ALL.get(idx).copied())
            .ok_or(hematite_bitstream::Error::InvalidEnum {
                name: "TransformType",
                value: value as u32,
            })
    }
}

impl TransformType {
    /// Varblock size in 8x8 blocks, as `(width, height)`.
    pub fn size_in_blocks(self) -> (u32, u32) {
        use TransformType::*;
        match self {
            Dct8 | Hornuss | Dct2 | Dct4 | Dct4x8 | Dct8x4 | Afv0 | Afv1 | Afv2 | Afv3 => (1, 1),
            Dct16 => (2, 2),
            Dct32 => (4, 4),
            Dct16x8 => (1, 2),
            Dct8x16 => (2, 1),
            Dct32x8 => (1, 4),
            Dct8x32 => (4, 1),
            Dct32x16 => (2, 4),
            Dct16x32 => (4, 2),
            Dct64 => (8, 8),
            Dct64x32 => (4, 8),
            Dct32x64 => (8, 4),
            Dct128 => (16, 16),
            Dct128x64 => (8, 16),
            Dct64x128 => (16, 8),
            Dct256 => (32, 32),
            Dct256x128 => (16, 32),
            Dct128x256 => (32, 16),
        }
    }

    /// Index into the 17-entry dequantization parameter library.
    pub fn param_index(self) -> usize {
        use TransformType::*;
        match self {
            Dct8 => 0,
            Hornuss => 1,
            Dct2 => 2,
            Dct4 => 3,
            Dct16 => 4,
            Dct32 => 5,
            Dct16x8 | Dct8x16 => 6,
            Dct32x8 | Dct8x32 => 7,
            Dct32x16 | Dct16x32 => 8,
            Dct4x8 | Dct8x4 => 9,
            Afv0 | Afv1 | Afv2 | Afv3 => 10,
            Dct64 => 11,
            Dct64x32 | Dct32x64 => 12,
            Dct128 => 13,
            Dct128x64 | Dct64x128 => 14,
            Dct256 => 15,
            Dct256x128 | Dct128x256 => 16,
        }
    }

    /// Dequantization matrix size, as `(width, height)` with the wider
    /// dimension first.
    pub fn matrix_size(self) -> (u32, u32) {
        use TransformType::*;
        match self {
            Dct8 | Hornuss | Dct2 | Dct4 | Dct4x8 | Dct8x4 | Afv0 | Afv1 | Afv2 | Afv3 => (8, 8),
            Dct16 => (16, 16),
            Dct32 => (32, 32),
            Dct16x8 | Dct8x16 => (16, 8),
            Dct32x8 | Dct8x32 => (32, 8),
            Dct32x16 | Dct16x32 => (32, 16),
            Dct64 => (64, 64),
            Dct64x32 | Dct32x64 => (64, 32),
            Dct128 => (128, 128),
            Dct128x64 | Dct64x128 => (128, 64),
            Dct256 => (256, 256),
            Dct256x128 | Dct128x256 => (256, 128),
        }
    }

    /// Index into the 13-entry coefficient order table.
    pub fn order_index(self) -> usize {
        use TransformType::*;
        match self {
            Dct8 => 0,
            Hornuss | Dct2 | Dct4 | Dct4x8 | Dct8x4 | Afv0 | Afv1 | Afv2 | Afv3 => 1,
            Dct16 => 2,
            Dct32 => 3,
            Dct16x8 | Dct8x16 => 4,
            Dct32x8 | Dct8x32 => 5,
            Dct32x16 | Dct16x32 => 6,
            Dct64 => 7,
            Dct64x32 | Dct32x64 => 8,
            Dct128 => 9,
            Dct128x64 | Dct64x128 => 10,
            Dct256 => 11,
            Dct256x128 | Dct128x256 => 12,
        }
    }

    /// Whether coefficients are stored transposed relative to the sample
    /// region of the varblock.
    #[inline]
    pub fn transposed(self) -> bool {
        use TransformType::*;
        if matches!(
            self,
            Hornuss | Dct2 | Dct4 | Dct4x8 | Dct8x4 | Afv0 | Afv1 | Afv2 | Afv3
        ) {
            false
        } else {
            let (w, h) = self.size_in_blocks();
            h >= w
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TransformType;

    #[test]
    fn tall_blocks_transpose() {
        assert!(TransformType::Dct16x8.transposed());
        assert!(!TransformType::Dct8x16.transposed());
        assert!(TransformType::Dct8.transposed());
        assert!(!TransformType::Afv2.transposed());
    }

    #[test]
    fn matrix_is_wide_side_first() {
        for id in 0..27 {
            let ty = TransformType::try_from(id).unwrap();
            let (mw, mh) = ty.matrix_size();
            assert!(mw >= mh);
            let (bw, bh) = ty.size_in_blocks();
            assert_eq!(mw * mh, bw * bh * 64);
        }
    }
}
