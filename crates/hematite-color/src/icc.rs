//! Reading the entropy-coded ICC stream.
//!
//! Profile contents are not interpreted; the stream still has to be decoded
//! to find where it ends.

use hematite_bitstream::Bitstream;
use hematite_coding::Decoder;

const MAX_ENCODED_SIZE: u64 = 1 << 28;

/// Decodes the encoded ICC byte stream that follows the image header when
/// `want_icc` is set.
pub fn read_icc(bitstream: &mut Bitstream) -> Result<Vec<u8>, hematite_coding::Error> {
    let enc_size = bitstream.read_u64()?;
    if enc_size > MAX_ENCODED_SIZE {
        return Err(hematite_bitstream::Error::ProfileConformance("ICC stream too large").into());
    }

    let mut decoder = Decoder::parse(bitstream, 41)?;
    decoder.begin(bitstream)?;

    let mut data = Vec::with_capacity(enc_size as usize);
    let (mut b1, mut b2) = (0u8, 0u8);
    for idx in 0..enc_size {
        let ctx = icc_context(idx, b1, b2);
        let value = decoder.read_varint(bitstream, ctx)?;
        if value > 255 {
            return Err(hematite_bitstream::Error::ValidationFailed(
                "ICC byte out of range",
            )
            .into());
        }
        b2 = b1;
        b1 = value as u8;
        data.push(value as u8);
    }
    decoder.finalize()?;
    Ok(data)
}

/// Context selection over the previous two bytes; the first bytes after the
/// header share context 0.
fn icc_context(idx: u64, b1: u8, b2: u8) -> u32 {
    if idx <= 128 {
        return 0;
    }
    let p1 = match b1 {
        b'a'..=b'z' | b'A'..=b'Z' => 0,
        b'0'..=b'9' | b'.' | b',' => 1,
        0..=1 => 2,
        2..=15 => 3,
        241..=254 => 5,
        255 => 6,
        _ => 4,
    };
    let p2 = match b2 {
        b'a'..=b'z' | b'A'..=b'Z' => 0,
        b'0'..=b'9' | b'.' | b',' => 1,
        0..=15 => 2,
        241..=255 => 3,
        _ => 4,
    };
    1 + p1 + 8 * p2
}

#[cfg(test)]
mod tests {
    use super::icc_context;

    #[test]
    fn context_stays_in_range() {
        for idx in [0u64, 128, 129, 1000] {
            for b1 in 0..=255u8 {
                for b2 in 0..=255u8 {
                    assert!(icc_context(idx, b1, b2) < 41);
                }
            }
        }
    }
}
