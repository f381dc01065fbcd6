//! Entropy decoding for jxl-hematite.
//!
//! [`Decoder`] implements the JPEG XL entropy coding layer: clustered
//! distributions read either as prefix codes or as rANS alias tables, hybrid
//! integer expansion, and the optional LZ77 window on top. The helpers
//! [`read_clusters`] and [`read_permutation`] are shared with other parts of
//! the codestream syntax.

use hematite_bitstream::{Bits, Bitstream};

mod ans;
mod error;
mod permutation;
mod prefix;

pub use ans::ANS_FINAL_STATE;
pub use error::{Error, Result};
pub use permutation::read_permutation;

/// Maximum offset reachable by an LZ77 copy.
const LZ_WINDOW_LEN: usize = 1 << 20;

/// Special LZ77 distance codes, as `(offset, row_distance)` pairs combined
/// with the caller's distance multiplier.
const SPECIAL_DISTANCES: [[i8; 2]; 120] = [
    [0, 1], [1, 0], [1, 1], [-1, 1], [0, 2], [2, 0], [1, 2], [-1, 2], [2, 1], [-2, 1], [2, 2],
    [-2, 2], [0, 3], [3, 0], [1, 3], [-1, 3], [3, 1], [-3, 1], [2, 3], [-2, 3], [3, 2],
    [-3, 2], [0, 4], [4, 0], [1, 4], [-1, 4], [4, 1], [-4, 1], [3, 3], [-3, 3], [2, 4],
    [-2, 4], [4, 2], [-4, 2], [0, 5], [3, 4], [-3, 4], [4, 3], [-4, 3], [5, 0], [1, 5],
    [-1, 5], [5, 1], [-5, 1], [2, 5], [-2, 5], [5, 2], [-5, 2], [4, 4], [-4, 4], [3, 5],
    [-3, 5], [5, 3], [-5, 3], [0, 6], [6, 0], [1, 6], [-1, 6], [6, 1], [-6, 1], [2, 6],
    [-2, 6], [6, 2], [-6, 2], [4, 5], [-4, 5], [5, 4], [-5, 4], [3, 6], [-3, 6], [6, 3],
    [-6, 3], [0, 7], [7, 0], [1, 7], [-1, 7], [5, 5], [-5, 5], [7, 1], [-7, 1], [4, 6],
    [-4, 6], [6, 4], [-6, 4], [2, 7], [-2, 7], [7, 2], [-7, 2], [3, 7], [-3, 7], [7, 3],
    [-7, 3], [5, 6], [-5, 6], [6, 5], [-6, 5], [8, 0], [4, 7], [-4, 7], [7, 4], [-7, 4],
    [8, 1], [8, 2], [6, 6], [-6, 6], [8, 3], [5, 7], [-5, 7], [7, 5], [-7, 5], [8, 4], [6, 7],
    [-6, 7], [7, 6], [-7, 6], [8, 5], [7, 7], [-7, 7], [8, 6], [8, 7],
];

/// Hybrid integer configuration attached to each cluster.
#[derive(Debug, Clone)]
pub struct IntegerConfig {
    split_exponent: u32,
    msb_in_token: u32,
    lsb_in_token: u32,
}

impl IntegerConfig {
    fn parse(bitstream: &mut Bitstream, log_alphabet_size: u32) -> Result<Self> {
        let split_exponent = bitstream.read_bits(add_log2_ceil(log_alphabet_size) as usize)?;
        let (msb_in_token, lsb_in_token) = if split_exponent == log_alphabet_size {
            (0, 0)
        } else {
            let msb_in_token = bitstream.read_bits(add_log2_ceil(split_exponent) as usize)?;
            if msb_in_token > split_exponent {
                return Err(Error::InvalidIntegerConfig);
            }
            let lsb_in_token =
                bitstream.read_bits(add_log2_ceil(split_exponent - msb_in_token) as usize)?;
            (msb_in_token, lsb_in_token)
        };
        if msb_in_token + lsb_in_token > split_exponent {
            return Err(Error::InvalidIntegerConfig);
        }
        Ok(Self {
            split_exponent,
            msb_in_token,
            lsb_in_token,
        })
    }

    /// Expands a token into the decoded integer, pulling extra bits from the
    /// bitstream. Decoded values are capped below `2^30`.
    fn expand(&self, bitstream: &mut Bitstream, token: u32) -> Result<u32> {
        let split = 1u32 << self.split_exponent;
        if token < split {
            return Ok(token);
        }

        let midbits = self.split_exponent - (self.msb_in_token + self.lsb_in_token)
            + ((token - split) >> (self.msb_in_token + self.lsb_in_token));
        if midbits > 30 {
            return Err(Error::IntegerOverflow);
        }
        let low = token & ((1 << self.lsb_in_token) - 1);
        let token = token >> self.lsb_in_token;
        let high = (token & ((1 << self.msb_in_token) - 1)) | (1 << self.msb_in_token);

        let mid = bitstream.read_bits(midbits as usize)?;
        let value = ((((high as u64) << midbits) | mid as u64) << self.lsb_in_token) | low as u64;
        if value >= 1 << 30 {
            return Err(Error::IntegerOverflow);
        }
        Ok(value as u32)
    }
}

#[derive(Debug, Clone)]
enum Code {
    Prefix(Vec<prefix::PrefixHistogram>),
    Ans {
        dist: Vec<ans::AnsHistogram>,
        state: u32,
        initialized: bool,
    },
}

impl Code {
    fn read_symbol(&mut self, bitstream: &mut Bitstream, cluster: u8) -> Result<u32> {
        match self {
            Self::Prefix(dist) => Ok(dist[cluster as usize].read_symbol(bitstream)? as u32),
            Self::Ans {
                dist,
                state,
                initialized,
            } => {
                if !*initialized {
                    *state = bitstream.read_bits(32)?;
                    *initialized = true;
                }
                dist[cluster as usize].read_symbol(bitstream, state)
            }
        }
    }

    fn single_symbol(&self, cluster: u8) -> Option<u16> {
        match self {
            Self::Prefix(dist) => dist[cluster as usize].single_symbol(),
            Self::Ans { dist, .. } => dist[cluster as usize].single_symbol(),
        }
    }
}

#[derive(Clone)]
struct Lz77 {
    min_symbol: u32,
    min_length: u32,
    len_config: IntegerConfig,
    window: Vec<u32>,
    num_to_copy: u32,
    copy_pos: u32,
    num_decoded: u32,
}

impl std::fmt::Debug for Lz77 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lz77")
            .field("min_symbol", &self.min_symbol)
            .field("min_length", &self.min_length)
            .field("num_to_copy", &self.num_to_copy)
            .field("copy_pos", &self.copy_pos)
            .field("num_decoded", &self.num_decoded)
            .finish_non_exhaustive()
    }
}

/// An entropy decoder for one section of the codestream.
#[derive(Debug, Clone)]
pub struct Decoder {
    clusters: Vec<u8>,
    configs: Vec<IntegerConfig>,
    code: Code,
    lz77: Option<Lz77>,
}

impl Decoder {
    /// Reads the distribution bundle for `num_dist` contexts.
    pub fn parse(bitstream: &mut Bitstream, num_dist: u32) -> Result<Self> {
        Self::parse_inner(bitstream, num_dist, true)
    }

    /// Same as [`parse`](Self::parse), but rejects LZ77; used for nested
    /// distributions such as the cluster map's own decoder.
    fn parse_assume_no_lz77(bitstream: &mut Bitstream, num_dist: u32) -> Result<Self> {
        Self::parse_inner(bitstream, num_dist, false)
    }

    fn parse_inner(bitstream: &mut Bitstream, num_dist: u32, allow_lz77: bool) -> Result<Self> {
        let lz77_enabled = bitstream.read_bool()?;
        if lz77_enabled && !allow_lz77 {
            return Err(Error::Lz77NotAllowed);
        }

        let (lz77_header, num_dist) = if lz77_enabled {
            let min_symbol = bitstream.read_u32(224, 512, 4096, 8 + Bits(15))?;
            let min_length = bitstream.read_u32(3, 4, 5 + Bits(2), 9 + Bits(8))?;
            let len_config = IntegerConfig::parse(bitstream, 8)?;
            // One synthesized distribution is appended for the LZ lengths.
            (Some((min_symbol, min_length, len_config)), num_dist + 1)
        } else {
            (None, num_dist)
        };

        let (num_clusters, clusters) = read_clusters(bitstream, num_dist)?;
        let use_prefix_code = bitstream.read_bool()?;
        let log_alphabet_size = if use_prefix_code {
            15
        } else {
            5 + bitstream.read_bits(2)?
        };
        let configs = (0..num_clusters)
            .map(|_| IntegerConfig::parse(bitstream, log_alphabet_size))
            .collect::<Result<Vec<_>>>()?;

        let code = if use_prefix_code {
            let alphabet_sizes = (0..num_clusters)
                .map(|_| {
                    let count = if bitstream.read_bool()? {
                        let n = bitstream.read_bits(4)? as usize;
                        1 + (1 << n) + bitstream.read_bits(n)?
                    } else {
                        1
                    };
                    if count > 1 << 15 {
                        return Err(Error::InvalidPrefixHistogram);
                    }
                    Ok(count)
                })
                .collect::<Result<Vec<_>>>()?;
            let dist = alphabet_sizes
                .into_iter()
                .map(|size| prefix::PrefixHistogram::parse(bitstream, size))
                .collect::<Result<Vec<_>>>()?;
            Code::Prefix(dist)
        } else {
            let dist = (0..num_clusters)
                .map(|_| ans::AnsHistogram::parse(bitstream, log_alphabet_size))
                .collect::<Result<Vec<_>>>()?;
            Code::Ans {
                dist,
                state: 0,
                initialized: false,
            }
        };

        let lz77 = lz77_header.map(|(min_symbol, min_length, len_config)| Lz77 {
            min_symbol,
            min_length,
            len_config,
            window: Vec::new(),
            num_to_copy: 0,
            copy_pos: 0,
            num_decoded: 0,
        });

        Ok(Self {
            clusters,
            configs,
            code,
            lz77,
        })
    }

    /// Explicitly reads the initial ANS state. Reading the first symbol does
    /// this implicitly; sections that may contain zero symbols still need the
    /// state for the final check.
    pub fn begin(&mut self, bitstream: &mut Bitstream) -> Result<()> {
        if let Code::Ans {
            state, initialized, ..
        } = &mut self.code
        {
            *state = bitstream.read_bits(32)?;
            *initialized = true;
        }
        Ok(())
    }

    /// Verifies the end-of-stream condition; for ANS streams, the final
    /// state must be the encoder's initial constant.
    pub fn finalize(&self) -> Result<()> {
        match &self.code {
            Code::Prefix(_) => Ok(()),
            Code::Ans { state, .. } => {
                if *state == ANS_FINAL_STATE {
                    Ok(())
                } else {
                    Err(Error::InvalidAnsStream)
                }
            }
        }
    }

    /// Returns the context-to-cluster map.
    #[inline]
    pub fn cluster_map(&self) -> &[u8] {
        &self.clusters
    }

    /// Returns the token a cluster always decodes to, if its distribution is
    /// degenerate and the token needs no extra bits.
    pub fn single_token(&self, cluster: u8) -> Option<u32> {
        let symbol = self.code.single_symbol(cluster)? as u32;
        let split = 1u32 << self.configs[cluster as usize].split_exponent;
        (symbol < split).then_some(symbol)
    }

    /// Reads one integer with the given context.
    #[inline]
    pub fn read_varint(&mut self, bitstream: &mut Bitstream, ctx: u32) -> Result<u32> {
        self.read_varint_with_multiplier(bitstream, ctx, 0)
    }

    /// Reads one integer with the given context and LZ77 distance multiplier.
    #[inline]
    pub fn read_varint_with_multiplier(
        &mut self,
        bitstream: &mut Bitstream,
        ctx: u32,
        dist_multiplier: u32,
    ) -> Result<u32> {
        let cluster = self.clusters[ctx as usize];
        self.read_varint_clustered(bitstream, cluster, dist_multiplier)
    }

    /// Reads one integer from a cluster resolved by the caller, bypassing
    /// the context map.
    pub fn read_varint_clustered(
        &mut self,
        bitstream: &mut Bitstream,
        cluster: u8,
        dist_multiplier: u32,
    ) -> Result<u32> {
        if self.lz77.is_some() {
            self.read_lz77(bitstream, cluster, dist_multiplier)
        } else {
            let token = self.code.read_symbol(bitstream, cluster)?;
            self.configs[cluster as usize].expand(bitstream, token)
        }
    }

    fn read_lz77(
        &mut self,
        bitstream: &mut Bitstream,
        cluster: u8,
        dist_multiplier: u32,
    ) -> Result<u32> {
        let lz77 = self.lz77.as_mut().unwrap();
        if lz77.window.is_empty() {
            // Distance 0 against an empty history is defined to copy zeros.
            lz77.window = vec![0u32; LZ_WINDOW_LEN];
        }

        let value = if lz77.num_to_copy > 0 {
            let value = lz77.window[(lz77.copy_pos as usize) & (LZ_WINDOW_LEN - 1)];
            lz77.copy_pos += 1;
            lz77.num_to_copy -= 1;
            value
        } else {
            let token = self.code.read_symbol(bitstream, cluster)?;
            if token >= lz77.min_symbol {
                // A copy: length from the LZ length distribution, then a
                // distance token from the last cluster.
                let dist_cluster = *self.clusters.last().unwrap();
                lz77.num_to_copy =
                    lz77.len_config.expand(bitstream, token - lz77.min_symbol)? + lz77.min_length;

                let token = self.code.read_symbol(bitstream, dist_cluster)?;
                let distance = self.configs[dist_cluster as usize].expand(bitstream, token)?;
                let distance = if dist_multiplier == 0 {
                    distance + 1
                } else if distance < 120 {
                    let [offset, row_dist] = SPECIAL_DISTANCES[distance as usize];
                    (offset as i32 + dist_multiplier as i32 * row_dist as i32).max(1) as u32
                } else {
                    distance - 119
                };
                let distance = distance
                    .min(LZ_WINDOW_LEN as u32)
                    .min(lz77.num_decoded);
                lz77.copy_pos = lz77.num_decoded - distance;

                let value = lz77.window[(lz77.copy_pos as usize) & (LZ_WINDOW_LEN - 1)];
                lz77.copy_pos += 1;
                lz77.num_to_copy -= 1;
                value
            } else {
                self.configs[cluster as usize].expand(bitstream, token)?
            }
        };

        lz77.window[(lz77.num_decoded as usize) & (LZ_WINDOW_LEN - 1)] = value;
        lz77.num_decoded += 1;
        Ok(value)
    }
}

/// Reads the distribution cluster map for `num_dist` contexts.
///
/// Returns the number of clusters and the per-context cluster indices. Used
/// clusters must form a contiguous range starting at zero.
pub fn read_clusters(bitstream: &mut Bitstream, num_dist: u32) -> Result<(u32, Vec<u8>)> {
    if num_dist == 1 {
        return Ok((1, vec![0]));
    }

    let clusters = if bitstream.read_bool()? {
        // Simple clustering: raw fixed-width indices.
        let nbits = bitstream.read_bits(2)? as usize;
        (0..num_dist)
            .map(|_| bitstream.read_bits(nbits).map(|idx| idx as u8))
            .collect::<std::result::Result<Vec<_>, _>>()?
    } else {
        let use_mtf = bitstream.read_bool()?;
        let mut decoder = if num_dist <= 2 {
            Decoder::parse_assume_no_lz77(bitstream, 1)?
        } else {
            Decoder::parse(bitstream, 1)?
        };
        decoder.begin(bitstream)?;
        let mut clusters = (0..num_dist)
            .map(|_| {
                let value = decoder.read_varint(bitstream, 0)?;
                if value >= 256 {
                    return Err(Error::InvalidCluster);
                }
                Ok(value as u8)
            })
            .collect::<Result<Vec<_>>>()?;
        decoder.finalize()?;

        if use_mtf {
            let mut mtf: [u8; 256] = std::array::from_fn(|idx| idx as u8);
            for cluster in &mut clusters {
                let idx = *cluster as usize;
                *cluster = mtf[idx];
                mtf.copy_within(0..idx, 1);
                mtf[0] = *cluster;
            }
        }
        clusters
    };

    let num_clusters = *clusters.iter().max().unwrap() as u32 + 1;
    if num_clusters > 256 {
        return Err(Error::InvalidCluster);
    }
    // Every cluster index below the maximum must actually occur.
    let mut used = vec![false; num_clusters as usize];
    for &cluster in &clusters {
        used[cluster as usize] = true;
    }
    if used.iter().any(|&used| !used) {
        tracing::error!(num_clusters, "cluster map has unused clusters");
        return Err(Error::InvalidCluster);
    }

    Ok((num_clusters, clusters))
}

fn add_log2_ceil(x: u32) -> u32 {
    (x + 1).next_power_of_two().trailing_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

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
            for i in 0..n {
                if self.bit_pos % 8 == 0 {
                    self.bytes.push(0);
                }
                if value & (1 << i) != 0 {
                    *self.bytes.last_mut().unwrap() |= 1 << (self.bit_pos % 8);
                }
                self.bit_pos += 1;
            }
        }
    }

    #[test]
    fn hybrid_integer_round_trip() {
        // Mirror of `IntegerConfig::expand`: split a value into token and
        // extra bits, then decode it back.
        let config = IntegerConfig {
            split_exponent: 4,
            msb_in_token: 2,
            lsb_in_token: 1,
        };

        for value in [0u32, 15, 16, 17, 100, 1000, 65535, (1 << 30) - 1] {
            let (token, extra, extra_len) = encode_hybrid(&config, value);
            let mut writer = BitWriter::new();
            writer.put(extra, extra_len);
            let mut bitstream = Bitstream::new(&writer.bytes);
            assert_eq!(config.expand(&mut bitstream, token).unwrap(), value);
        }
    }

    fn encode_hybrid(config: &IntegerConfig, value: u32) -> (u32, u32, usize) {
        let split = 1u32 << config.split_exponent;
        if value < split {
            return (value, 0, 0);
        }
        let msb = config.msb_in_token;
        let lsb = config.lsb_in_token;
        let n = 31 - value.leading_zeros();
        let midbits = n - msb - lsb;
        let low = value & ((1 << lsb) - 1);
        let mid = (value >> lsb) & ((1 << midbits) - 1);
        let high = (value >> (lsb + midbits)) & ((1 << msb) - 1);
        let token = split
            + (((midbits - (config.split_exponent - msb - lsb)) << (msb + lsb))
                | (high << lsb)
                | low);
        (token, mid, midbits as usize)
    }

    #[test]
    fn oversized_hybrid_integer_is_rejected() {
        let config = IntegerConfig {
            split_exponent: 4,
            msb_in_token: 0,
            lsb_in_token: 0,
        };
        // Token far beyond the 2^30 cap.
        let mut bitstream = Bitstream::new(&[0u8; 16]);
        assert!(matches!(
            config.expand(&mut bitstream, 16 + 40),
            Err(Error::IntegerOverflow)
        ));
    }

    #[test]
    fn lz77_copy_reproduces_window() {
        let mut lz77 = Lz77 {
            min_symbol: 224,
            min_length: 3,
            len_config: IntegerConfig {
                split_exponent: 8,
                msb_in_token: 0,
                lsb_in_token: 0,
            },
            window: vec![0u32; LZ_WINDOW_LEN],
            num_to_copy: 0,
            copy_pos: 0,
            num_decoded: 0,
        };

        // Emulate literals 5, 6, 7, then a copy of length 3 at distance 3.
        for (idx, value) in [5u32, 6, 7].into_iter().enumerate() {
            lz77.window[idx] = value;
            lz77.num_decoded += 1;
        }
        lz77.num_to_copy = 3;
        lz77.copy_pos = lz77.num_decoded - 3;

        let mut produced = Vec::new();
        for _ in 0..3 {
            let value = lz77.window[lz77.copy_pos as usize & (LZ_WINDOW_LEN - 1)];
            lz77.copy_pos += 1;
            lz77.window[lz77.num_decoded as usize & (LZ_WINDOW_LEN - 1)] = value;
            lz77.num_decoded += 1;
            produced.push(value);
        }
        assert_eq!(produced, [5, 6, 7]);
    }
}
