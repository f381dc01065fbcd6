//! rANS symbol distributions and the alias table used to decode them.

use hematite_bitstream::Bitstream;

use crate::{Error, Result};

pub const ANS_FINAL_STATE: u32 = 0x130000;
const DIST_SUM_BITS: u32 = 12;
const DIST_SUM: u32 = 1 << DIST_SUM_BITS;

/// One entry of the alias table.
///
/// Positions below `cutoff` belong to the bucket's own symbol (the bucket
/// index); positions at or above it belong to `symbol`, whose in-symbol
/// offset is `offset + pos` (`offset` is stored pre-biased by `-cutoff`).
#[derive(Debug, Clone, Copy, Default)]
struct AliasBucket {
    cutoff: u16,
    offset: u16,
    symbol: u16,
}

/// An rANS distribution together with its alias table.
#[derive(Debug, Clone)]
pub struct AnsHistogram {
    dist: Vec<u16>,
    buckets: Vec<AliasBucket>,
    log_bucket_size: u32,
    single_symbol: Option<u16>,
}

impl AnsHistogram {
    /// Reads a distribution of `2^log_alpha_size` entries summing to `2^12`,
    /// and builds its alias table.
    pub fn parse(bitstream: &mut Bitstream, log_alpha_size: u32) -> Result<Self> {
        debug_assert!((5..=8).contains(&log_alpha_size));
        let table_size = 1usize << log_alpha_size;
        let mut dist = vec![0u16; table_size];

        if bitstream.read_bool()? {
            if bitstream.read_bool()? {
                // Two-entry distribution.
                let s0 = read_small_count(bitstream)? as usize;
                let s1 = read_small_count(bitstream)? as usize;
                if s0 == s1 || s0.max(s1) >= table_size {
                    return Err(Error::InvalidAnsHistogram);
                }
                let p = bitstream.read_bits(12)? as u16;
                dist[s0] = p;
                dist[s1] = DIST_SUM as u16 - p;
            } else {
                // Single-entry distribution.
                let s = read_small_count(bitstream)? as usize;
                if s >= table_size {
                    return Err(Error::InvalidAnsHistogram);
                }
                dist[s] = DIST_SUM as u16;
            }
        } else if bitstream.read_bool()? {
            // Flat distribution over the first `alphabet_size` symbols.
            let alphabet_size = read_small_count(bitstream)? as usize + 1;
            if alphabet_size > table_size {
                return Err(Error::InvalidAnsHistogram);
            }
            let base = DIST_SUM as usize / alphabet_size;
            let rem = DIST_SUM as usize % alphabet_size;
            dist[..rem].fill(base as u16 + 1);
            dist[rem..alphabet_size].fill(base as u16);
        } else {
            read_bitcount_dist(bitstream, table_size, &mut dist)?;
        }

        Self::with_dist(dist, log_alpha_size)
    }

    fn with_dist(dist: Vec<u16>, log_alpha_size: u32) -> Result<Self> {
        let log_bucket_size = DIST_SUM_BITS - log_alpha_size;
        let bucket_size = 1u16 << log_bucket_size;
        let single_symbol = dist
            .iter()
            .position(|&d| d == DIST_SUM as u16)
            .map(|idx| idx as u16);

        // Alias construction: move probability mass from overfull buckets
        // into underfull ones until every bucket holds exactly
        // `bucket_size` units.
        struct Working {
            cutoff: u16,
            offset: u16,
            symbol: u16,
        }
        let mut working: Vec<_> = dist
            .iter()
            .enumerate()
            .map(|(idx, &d)| Working {
                cutoff: d,
                offset: 0,
                symbol: idx as u16,
            })
            .collect();

        let mut underfull = Vec::new();
        let mut overfull = Vec::new();
        for (idx, w) in working.iter().enumerate() {
            match w.cutoff.cmp(&bucket_size) {
                std::cmp::Ordering::Less => underfull.push(idx),
                std::cmp::Ordering::Equal => {}
                std::cmp::Ordering::Greater => overfull.push(idx),
            }
        }
        while let (Some(o), Some(u)) = (overfull.pop(), underfull.pop()) {
            let moved = bucket_size - working[u].cutoff;
            working[o].cutoff -= moved;
            working[u].symbol = o as u16;
            working[u].offset = working[o].cutoff;
            match working[o].cutoff.cmp(&bucket_size) {
                std::cmp::Ordering::Less => underfull.push(o),
                std::cmp::Ordering::Equal => {}
                std::cmp::Ordering::Greater => overfull.push(o),
            }
        }
        if !overfull.is_empty() || !underfull.is_empty() {
            return Err(Error::InvalidAnsHistogram);
        }

        let buckets = working
            .into_iter()
            .map(|w| {
                if w.cutoff == bucket_size {
                    AliasBucket {
                        cutoff: bucket_size,
                        offset: 0,
                        symbol: 0,
                    }
                } else {
                    AliasBucket {
                        cutoff: w.cutoff,
                        offset: w.offset - w.cutoff,
                        symbol: w.symbol,
                    }
                }
            })
            .collect();

        Ok(Self {
            dist,
            buckets,
            log_bucket_size,
            single_symbol,
        })
    }

    /// Decodes one symbol, updating the rANS state.
    #[inline]
    pub fn read_symbol(&self, bitstream: &mut Bitstream, state: &mut u32) -> Result<u32> {
        let idx = *state & (DIST_SUM - 1);
        let bucket_idx = (idx >> self.log_bucket_size) as usize;
        let pos = idx & ((1 << self.log_bucket_size) - 1);
        let bucket = self.buckets[bucket_idx];

        let (symbol, offset) = if pos < bucket.cutoff as u32 {
            (bucket_idx, pos)
        } else {
            (bucket.symbol as usize, bucket.offset as u32 + pos)
        };

        let next = (*state >> DIST_SUM_BITS) * self.dist[symbol] as u32 + offset;
        *state = if next < (1 << 16) {
            let appended = (next << 16) | bitstream.peek_bits(16);
            bitstream.consume_bits(16)?;
            appended
        } else {
            next
        };
        Ok(symbol as u32)
    }

    #[inline]
    pub fn single_symbol(&self) -> Option<u16> {
        self.single_symbol
    }
}

/// Reads the variable-length small count used throughout ANS headers:
/// zero, or `2^n + u(n)` with `n = u(3)`.
fn read_small_count(bitstream: &mut Bitstream) -> Result<u32> {
    Ok(if bitstream.read_bool()? {
        let n = bitstream.read_bits(3)? as usize;
        (1 << n) + bitstream.read_bits(n)?
    } else {
        0
    })
}

/// Reads the bitcount-coded distribution (encoding 0): per-symbol magnitude
/// codes with a repeat command, one omitted entry absorbing the remainder.
fn read_bitcount_dist(
    bitstream: &mut Bitstream,
    table_size: usize,
    dist: &mut [u16],
) -> Result<()> {
    const REPEAT_CODE: u16 = 13;

    let mut len = 0;
    while len < 3 {
        if bitstream.read_bool()? {
            len += 1;
        } else {
            break;
        }
    }
    let shift = (bitstream.read_bits(len)? + (1 << len) - 1) as i16;
    if shift > 13 {
        return Err(Error::InvalidAnsHistogram);
    }

    let alphabet_size = read_small_count(bitstream)? as usize + 3;
    if alphabet_size > table_size {
        return Err(Error::InvalidAnsHistogram);
    }

    // First pass: read magnitude codes, expanding repeats.
    let mut codes = vec![0u16; alphabet_size];
    let mut repeats = vec![false; alphabet_size];
    let mut omit = None::<(u16, usize)>;
    let mut idx = 0;
    while idx < alphabet_size {
        let code = read_dist_prefix(bitstream)?;
        if code == REPEAT_CODE {
            let repeat = read_small_count(bitstream)? as usize + 4;
            if idx + repeat > alphabet_size {
                return Err(Error::InvalidAnsHistogram);
            }
            repeats[idx..idx + repeat].fill(true);
            idx += repeat;
            continue;
        }
        codes[idx] = code;
        // The largest magnitude is omitted from the stream and recovered
        // from the remainder at the end.
        match &mut omit {
            Some((max, pos)) => {
                if code > *max {
                    *max = code;
                    *pos = idx;
                }
            }
            slot => *slot = Some((code, idx)),
        }
        idx += 1;
    }
    let Some((_, omit_pos)) = omit else {
        return Err(Error::InvalidAnsHistogram);
    };
    if repeats.get(omit_pos + 1) == Some(&true) {
        return Err(Error::InvalidAnsHistogram);
    }

    // Second pass: expand codes into probabilities.
    let mut acc = 0u32;
    let mut prev = 0u16;
    for idx in 0..alphabet_size {
        if repeats[idx] {
            dist[idx] = prev;
            acc += prev as u32;
            if acc > DIST_SUM {
                return Err(Error::InvalidAnsHistogram);
            }
            continue;
        }
        if idx == omit_pos || codes[idx] == 0 {
            prev = 0;
            continue;
        }
        let value = if codes[idx] == 1 {
            1
        } else {
            let zeros = (codes[idx] - 1) as i16;
            let bitcount = (shift - ((12 - zeros) >> 1)).clamp(0, zeros);
            (1 << zeros) + ((bitstream.read_bits(bitcount as usize)? as u16) << (zeros - bitcount))
        };
        dist[idx] = value;
        prev = value;
        acc += value as u32;
        if acc > DIST_SUM {
            return Err(Error::InvalidAnsHistogram);
        }
    }
    dist[omit_pos] = (DIST_SUM - acc) as u16;
    Ok(())
}

/// Fixed prefix code over distribution magnitude codes 0..=13.
fn read_dist_prefix(bitstream: &mut Bitstream) -> Result<u16> {
    Ok(match bitstream.read_bits(3)? {
        0 => 10,
        1 => {
            for value in [4, 0, 11, 13] {
                if bitstream.read_bool()? {
                    return Ok(value);
                }
            }
            12
        }
        2 => 7,
        3 => {
            if bitstream.read_bool()? {
                1
            } else {
                3
            }
        }
        4 => 6,
        5 => 8,
        6 => 9,
        _ => {
            if bitstream.read_bool()? {
                2
            } else {
                5
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias_histogram(dist: Vec<u16>, log_alpha_size: u32) -> AnsHistogram {
        AnsHistogram::with_dist(dist, log_alpha_size).unwrap()
    }

    #[test]
    fn alias_table_partitions_probability_space() {
        let mut dist = vec![0u16; 32];
        dist[0] = 3000;
        dist[1] = 1000;
        dist[2] = 96;
        let histogram = alias_histogram(dist.clone(), 5);

        // Walk every 12-bit index without pulling new bits: each symbol must
        // be hit exactly `dist[s]` times, and in-symbol offsets must cover
        // `0..dist[s]` exactly once.
        let mut seen = vec![0u32; 32];
        let mut offsets = vec![Vec::new(); 32];
        for idx in 0..(1u32 << 12) {
            let bucket_idx = (idx >> histogram.log_bucket_size) as usize;
            let pos = idx & ((1 << histogram.log_bucket_size) - 1);
            let bucket = histogram.buckets[bucket_idx];
            let (symbol, offset) = if pos < bucket.cutoff as u32 {
                (bucket_idx, pos)
            } else {
                (bucket.symbol as usize, bucket.offset as u32 + pos)
            };
            seen[symbol] += 1;
            offsets[symbol].push(offset);
        }
        for (symbol, &d) in dist.iter().enumerate() {
            assert_eq!(seen[symbol], d as u32, "symbol {symbol}");
            let mut offsets = std::mem::take(&mut offsets[symbol]);
            offsets.sort_unstable();
            assert!(offsets.iter().enumerate().all(|(i, &o)| i as u32 == o));
        }
    }

    #[test]
    fn single_symbol_is_detected() {
        let mut dist = vec![0u16; 64];
        dist[5] = 1 << 12;
        let histogram = alias_histogram(dist, 6);
        assert_eq!(histogram.single_symbol(), Some(5));
    }

    #[test]
    fn decode_follows_distribution() {
        // With dist summing to 2^12, decoding from a uniformly chosen state
        // index must yield each symbol with probability dist[s] / 2^12.
        let mut dist = vec![0u16; 32];
        dist[0] = 2048;
        dist[7] = 2048;
        let histogram = alias_histogram(dist, 5);

        let mut counts = [0u32; 32];
        for idx in 0..(1u32 << 12) {
            // State high bits large enough to avoid a 16-bit refill.
            let mut state = (1 << 28) | idx;
            let mut bitstream = Bitstream::new(&[]);
            let symbol = histogram.read_symbol(&mut bitstream, &mut state).unwrap();
            counts[symbol as usize] += 1;
        }
        assert_eq!(counts[0], 2048);
        assert_eq!(counts[7], 2048);
    }
}
