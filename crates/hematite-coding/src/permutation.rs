use hematite_bitstream::Bitstream;

use crate::{Decoder, Error, Result};

/// Reads a Lehmer-coded permutation of `0..size`, with the first `skip`
/// entries fixed in place.
pub fn read_permutation(
    bitstream: &mut Bitstream,
    decoder: &mut Decoder,
    size: u32,
    skip: u32,
) -> Result<Vec<usize>> {
    let end = decoder.read_varint(bitstream, permutation_context(size))?;
    if end > size - skip {
        tracing::error!(size, skip, end, "invalid permutation length");
        return Err(Error::InvalidPermutation);
    }

    let mut lehmer = vec![0u32; end as usize];
    let mut prev = 0u32;
    for (idx, slot) in lehmer.iter_mut().enumerate() {
        let value = decoder.read_varint(bitstream, permutation_context(prev))?;
        if value >= size - skip - idx as u32 {
            tracing::error!(idx, size, value, "permutation index out of range");
            return Err(Error::InvalidPermutation);
        }
        *slot = value;
        prev = value;
    }

    let mut pool: Vec<usize> = (skip as usize..size as usize).collect();
    let mut permutation: Vec<usize> = (0..skip as usize).collect();
    for idx in lehmer {
        permutation.push(pool.remove(idx as usize));
    }
    permutation.extend(pool);
    Ok(permutation)
}

fn permutation_context(x: u32) -> u32 {
    crate::add_log2_ceil(x).min(7)
}

#[cfg(test)]
mod tests {
    /// Applies the Lehmer decoding step by hand: removing entries from a
    /// shrinking pool inverts to taking ranks in the remaining order.
    #[test]
    fn lehmer_round_trip() {
        let original = [3usize, 0, 4, 1, 2];

        // Encode: rank of each element among those not yet emitted.
        let mut pool: Vec<usize> = (0..original.len()).collect();
        let lehmer: Vec<usize> = original
            .iter()
            .map(|&v| {
                let rank = pool.iter().position(|&p| p == v).unwrap();
                pool.remove(rank);
                rank
            })
            .collect();

        // Decode.
        let mut pool: Vec<usize> = (0..original.len()).collect();
        let decoded: Vec<usize> = lehmer.into_iter().map(|rank| pool.remove(rank)).collect();
        assert_eq!(decoded, original);
    }
}
