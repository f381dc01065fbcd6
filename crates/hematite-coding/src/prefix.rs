//! Prefix codes, as defined by RFC 7932 section 3 with JPEG XL extensions.

use hematite_bitstream::Bitstream;

use crate::{Error, Result};

/// Order in which code lengths of the code length alphabet are transmitted.
const CODE_LENGTH_ORDER: [usize; 18] = [1, 2, 3, 4, 0, 5, 17, 6, 16, 7, 8, 9, 10, 11, 12, 13, 14, 15];

const MAX_CODE_LENGTH: usize = 15;

/// A decoded prefix code, stored as a full lookup table.
///
/// The table is indexed by the next `max_len` bits of the stream (LSB-first
/// peek order); each entry holds the decoded symbol and its code length.
#[derive(Debug, Clone)]
pub struct PrefixHistogram {
    table: Vec<(u16, u8)>,
    max_len: usize,
    single_symbol: Option<u16>,
}

impl PrefixHistogram {
    fn single(symbol: u16) -> Self {
        Self {
            table: vec![(symbol, 0)],
            max_len: 0,
            single_symbol: Some(symbol),
        }
    }

    /// Builds the decoding table from per-symbol code lengths.
    fn from_lengths(lengths: &[u8]) -> Result<Self> {
        let mut count_per_len = [0u32; MAX_CODE_LENGTH + 1];
        let mut max_len = 0usize;
        let mut kraft = 0u32;
        for &len in lengths {
            let len = len as usize;
            if len == 0 {
                continue;
            }
            if len > MAX_CODE_LENGTH {
                return Err(Error::InvalidPrefixHistogram);
            }
            count_per_len[len] += 1;
            max_len = max_len.max(len);
            kraft += 1 << (MAX_CODE_LENGTH - len);
            if kraft > 1 << MAX_CODE_LENGTH {
                return Err(Error::InvalidPrefixHistogram);
            }
        }

        if kraft != 1 << MAX_CODE_LENGTH {
            // A single zero-length code is allowed as a degenerate tree.
            let assigned: Vec<_> = lengths
                .iter()
                .enumerate()
                .filter(|(_, &len)| len != 0)
                .collect();
            if let [(symbol, _)] = assigned[..] {
                return Ok(Self::single(symbol as u16));
            }
            return Err(Error::InvalidPrefixHistogram);
        }

        // Canonical code assignment: shorter codes first, ties broken by
        // symbol index.
        let mut next_code = [0u32; MAX_CODE_LENGTH + 1];
        let mut code = 0u32;
        for len in 1..=MAX_CODE_LENGTH {
            code = (code + count_per_len[len - 1]) << 1;
            next_code[len] = code;
        }

        let mut table = vec![(0u16, 0u8); 1 << max_len];
        for (symbol, &len) in lengths.iter().enumerate() {
            let len = len as usize;
            if len == 0 {
                continue;
            }
            let code = next_code[len];
            next_code[len] += 1;

            // Codewords arrive MSB-first, so the stream-order index is the
            // bit-reversed codeword.
            let rev = (code.reverse_bits() >> (u32::BITS as usize - len)) as usize;
            let mut idx = rev;
            while idx < table.len() {
                table[idx] = (symbol as u16, len as u8);
                idx += 1 << len;
            }
        }

        Ok(Self {
            table,
            max_len,
            single_symbol: None,
        })
    }

    /// Reads the prefix code description for an alphabet of the given size.
    pub fn parse(bitstream: &mut Bitstream, alphabet_size: u32) -> Result<Self> {
        if alphabet_size == 1 {
            return Ok(Self::single(0));
        }

        let hskip = bitstream.read_bits(2)?;
        if hskip == 1 {
            Self::parse_simple(bitstream, alphabet_size)
        } else {
            Self::parse_complex(bitstream, alphabet_size, hskip as usize)
        }
    }

    fn parse_simple(bitstream: &mut Bitstream, alphabet_size: u32) -> Result<Self> {
        let alphabet_bits = alphabet_size.next_power_of_two().trailing_zeros() as usize;
        let num_symbols = bitstream.read_bits(2)? as usize + 1;

        let mut symbols = [0u32; 4];
        for symbol in symbols.iter_mut().take(num_symbols) {
            *symbol = bitstream.read_bits(alphabet_bits)?;
            if *symbol >= alphabet_size {
                return Err(Error::InvalidPrefixHistogram);
            }
        }

        let lens: &[u8] = match num_symbols {
            1 => return Ok(Self::single(symbols[0] as u16)),
            2 => &[1, 1],
            3 => &[1, 2, 2],
            4 => {
                if bitstream.read_bool()? {
                    &[1, 2, 3, 3]
                } else {
                    &[2, 2, 2, 2]
                }
            }
            _ => unreachable!(),
        };

        let mut lengths = vec![0u8; alphabet_size as usize];
        for (&symbol, &len) in symbols.iter().zip(lens) {
            if lengths[symbol as usize] != 0 {
                return Err(Error::InvalidPrefixHistogram);
            }
            lengths[symbol as usize] = len;
        }
        Self::from_lengths(&lengths)
    }

    fn parse_complex(
        bitstream: &mut Bitstream,
        alphabet_size: u32,
        hskip: usize,
    ) -> Result<Self> {
        // Layer 1: code lengths of the 18-symbol code length alphabet, read
        // with a fixed code.
        let mut cl_lengths = [0u8; 18];
        let mut space = 0u32;
        let mut nonzero_count = 0;
        let mut last_nonzero = 0usize;
        for &idx in CODE_LENGTH_ORDER.iter().skip(hskip) {
            let len = read_code_length_code(bitstream)?;
            cl_lengths[idx] = len;
            if len != 0 {
                nonzero_count += 1;
                last_nonzero = idx;
                space += 32 >> len;
                match space.cmp(&32) {
                    std::cmp::Ordering::Less => {}
                    std::cmp::Ordering::Equal => break,
                    std::cmp::Ordering::Greater => return Err(Error::InvalidPrefixHistogram),
                }
            }
        }

        let cl_code = if nonzero_count == 1 {
            Self::single(last_nonzero as u16)
        } else if space != 32 {
            return Err(Error::InvalidPrefixHistogram);
        } else {
            Self::from_lengths(&cl_lengths)?
        };

        // Layer 2: per-symbol code lengths, with the 16/17 repeat commands.
        let mut lengths = vec![0u8; alphabet_size as usize];
        let mut space = 0u32;
        let mut prev_nonzero_len = 8u8;
        let mut prev_code = 8u8;
        let mut last_repeat_count = 0usize;
        let mut repeat_count = 0usize;
        let mut repeat_len = 0u8;

        for len_out in &mut lengths {
            if repeat_count > 0 {
                *len_out = repeat_len;
                repeat_count -= 1;
            } else {
                let code = cl_code.read_symbol(bitstream)? as u8;
                match code {
                    0 => {}
                    1..=15 => {
                        *len_out = code;
                        prev_nonzero_len = code;
                    }
                    16 | 17 => {
                        let (extra_bits, base) = if code == 16 { (2, 3) } else { (3, 3) };
                        repeat_count = bitstream.read_bits(extra_bits)? as usize + base;
                        if prev_code == code {
                            // Consecutive identical repeat codes extend the
                            // previous run: total = mult * (total - 2) + new,
                            // applied here as a delta on the running count.
                            let mult = if code == 16 { 4 } else { 8 };
                            repeat_count += last_repeat_count * (mult - 1) - 2 * mult;
                            last_repeat_count += repeat_count;
                        } else {
                            last_repeat_count = repeat_count;
                        }
                        repeat_len = if code == 16 { prev_nonzero_len } else { 0 };
                        *len_out = repeat_len;
                        repeat_count -= 1;
                    }
                    _ => unreachable!(),
                }
                prev_code = code;
            }

            if *len_out != 0 {
                space += 1 << (MAX_CODE_LENGTH - *len_out as usize);
                if space > 1 << MAX_CODE_LENGTH {
                    return Err(Error::InvalidPrefixHistogram);
                }
                if space == 1 << MAX_CODE_LENGTH && repeat_count == 0 {
                    break;
                }
            }
        }

        if space != 1 << MAX_CODE_LENGTH || repeat_count > 0 {
            return Err(Error::InvalidPrefixHistogram);
        }
        Self::from_lengths(&lengths)
    }

    /// Decodes one symbol from the bitstream.
    #[inline]
    pub fn read_symbol(&self, bitstream: &mut Bitstream) -> Result<u16> {
        let peeked = bitstream.peek_bits(self.max_len) as usize;
        let (symbol, len) = self.table[peeked];
        bitstream.consume_bits(len as usize)?;
        Ok(symbol)
    }

    #[inline]
    pub fn single_symbol(&self) -> Option<u16> {
        self.single_symbol
    }
}

/// Reads one code length of the code length alphabet with the fixed code
/// `{0: 00, 3: 011 0, 1: 011 10, 5: 011 11, 4: 10, 2: 11 0, 5-way per RFC}`.
fn read_code_length_code(bitstream: &mut Bitstream) -> Result<u8> {
    // Fixed code from RFC 7932: lengths {2, 4, 3, 2, 2, 4} for symbols
    // {0, 1, 2, 3, 4, 5}, transmitted via a 2-bit selector with escapes.
    Ok(match bitstream.read_u32(0, 4, 3, 8)? {
        8 => {
            if bitstream.read_bool()? {
                if bitstream.read_bool()? {
                    5
                } else {
                    1
                }
            } else {
                2
            }
        }
        v => v as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_assignment_round_trips() {
        // Lengths {1, 2, 3, 3}: codewords 0, 10, 110, 111.
        let histogram =
            PrefixHistogram::from_lengths(&[1, 2, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();

        // Stream bits arrive LSB-first; codeword bits are read in order.
        // Symbol 3 = 111, symbol 0 = 0, symbol 1 = 10 (read as 1 then 0).
        let bytes = [0b0_01_0_111_u8];
        let mut bitstream = Bitstream::new(&bytes);
        assert_eq!(histogram.read_symbol(&mut bitstream).unwrap(), 3);
        assert_eq!(histogram.read_symbol(&mut bitstream).unwrap(), 0);
        assert_eq!(histogram.read_symbol(&mut bitstream).unwrap(), 1);
        assert_eq!(histogram.read_symbol(&mut bitstream).unwrap(), 0);
    }

    #[test]
    fn every_code_maps_back_to_its_length() {
        let lengths = [1u8, 2, 0, 3, 4, 4];
        let histogram = PrefixHistogram::from_lengths(&lengths).unwrap();
        for idx in 0..histogram.table.len() {
            let (symbol, len) = histogram.table[idx];
            assert_eq!(
                len,
                lengths[symbol as usize],
                "table entry {idx} disagrees with symbol length"
            );
        }
    }

    #[test]
    fn overfull_tree_is_rejected() {
        assert!(PrefixHistogram::from_lengths(&[1, 1, 1]).is_err());
    }

    #[test]
    fn underfull_tree_is_rejected() {
        assert!(PrefixHistogram::from_lengths(&[2, 2, 2]).is_err());
    }

    #[test]
    fn lone_symbol_reads_no_bits() {
        let histogram = PrefixHistogram::from_lengths(&[0, 0, 1, 0]).unwrap();
        assert_eq!(histogram.single_symbol(), Some(2));
        let mut bitstream = Bitstream::new(&[]);
        assert_eq!(histogram.read_symbol(&mut bitstream).unwrap(), 2);
    }

    #[test]
    fn simple_template_two_symbols() {
        // hskip = 1, nsym - 1 = 1, then two 3-bit symbols (alphabet size 5
        // rounds up to 8): 4 and 2. Canonical assignment gives the lower
        // symbol index the all-zero codeword.
        let bytes = [0x45, 0x01];
        let mut bitstream = Bitstream::new(&bytes);
        let histogram = PrefixHistogram::parse(&mut bitstream, 5).unwrap();

        let mut bits = Bitstream::new(&[0b10]);
        assert_eq!(histogram.read_symbol(&mut bits).unwrap(), 2);
        assert_eq!(histogram.read_symbol(&mut bits).unwrap(), 4);
    }
}
