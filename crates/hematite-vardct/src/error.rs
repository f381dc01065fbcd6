#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    Bitstream(hematite_bitstream::Error),
    Coding(hematite_coding::Error),
    Modular(hematite_modular::Error),
    /// Varblock placement overlaps, leaves holes, or runs out of entries.
    InvalidVarblock(&'static str),
    /// Dequantization matrix is malformed.
    InvalidDequantMatrix,
    /// HF coefficient stream is inconsistent.
    InvalidHfCoeff(&'static str),
}

impl Error {
    #[inline]
    pub fn unexpected_eof(&self) -> bool {
        match self {
            Self::Bitstream(e) => e.unexpected_eof(),
            Self::Coding(e) => e.unexpected_eof(),
            Self::Modular(e) => e.unexpected_eof(),
            _ => false,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bitstream(e) => Some(e),
            Self::Coding(e) => Some(e),
            Self::Modular(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitstream(e) => write!(f, "bitstream error: {e}"),
            Self::Coding(e) => write!(f, "entropy decoder error: {e}"),
            Self::Modular(e) => write!(f, "modular error: {e}"),
            Self::InvalidVarblock(msg) => write!(f, "invalid varblock layout: {msg}"),
            Self::InvalidDequantMatrix => write!(f, "invalid dequantization matrix"),
            Self::InvalidHfCoeff(msg) => write!(f, "invalid HF coefficient data: {msg}"),
        }
    }
}

impl From<hematite_bitstream::Error> for Error {
    fn from(e: hematite_bitstream::Error) -> Self {
        Self::Bitstream(e)
    }
}

impl From<hematite_coding::Error> for Error {
    fn from(e: hematite_coding::Error) -> Self {
        Self::Coding(e)
    }
}

impl From<hematite_modular::Error> for Error {
    fn from(e: hematite_modular::Error) -> Self {
        Self::Modular(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
