#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    Bitstream(hematite_bitstream::Error),
    /// ANS distribution doesn't sum to `1 << 12`, or is otherwise malformed.
    InvalidAnsHistogram,
    /// ANS stream ended with an unexpected final state.
    InvalidAnsStream,
    /// Prefix code histogram is not a valid prefix code.
    InvalidPrefixHistogram,
    /// Hybrid integer configuration is inconsistent.
    InvalidIntegerConfig,
    /// Hybrid integer would decode to a value of 2^30 or larger.
    IntegerOverflow,
    /// Cluster map has holes or out-of-range entries.
    InvalidCluster,
    /// Lehmer permutation index out of range.
    InvalidPermutation,
    /// LZ77 was enabled where the syntax forbids it.
    Lz77NotAllowed,
}

impl Error {
    #[inline]
    pub fn unexpected_eof(&self) -> bool {
        matches!(self, Self::Bitstream(e) if e.unexpected_eof())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bitstream(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitstream(e) => write!(f, "bitstream error: {e}"),
            Self::InvalidAnsHistogram => write!(f, "invalid ANS distribution"),
            Self::InvalidAnsStream => write!(f, "ANS stream ended with invalid state"),
            Self::InvalidPrefixHistogram => write!(f, "invalid prefix code"),
            Self::InvalidIntegerConfig => write!(f, "invalid hybrid integer configuration"),
            Self::IntegerOverflow => write!(f, "hybrid integer too large"),
            Self::InvalidCluster => write!(f, "invalid distribution clustering"),
            Self::InvalidPermutation => write!(f, "invalid Lehmer permutation"),
            Self::Lz77NotAllowed => write!(f, "LZ77 is not allowed here"),
        }
    }
}

impl From<hematite_bitstream::Error> for Error {
    fn from(e: hematite_bitstream::Error) -> Self {
        Self::Bitstream(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
