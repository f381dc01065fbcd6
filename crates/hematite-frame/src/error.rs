#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    Bitstream(hematite_bitstream::Error),
    Coding(hematite_coding::Error),
    Modular(hematite_modular::Error),
    VarDct(hematite_vardct::Error),
    /// TOC permutation is inconsistent with the section count.
    InvalidTocPermutation,
}

impl Error {
    #[inline]
    pub fn unexpected_eof(&self) -> bool {
        match self {
            Self::Bitstream(e) => e.unexpected_eof(),
            Self::Coding(e) => e.unexpected_eof(),
            Self::Modular(e) => e.unexpected_eof(),
            Self::VarDct(e) => e.unexpected_eof(),
            Self::InvalidTocPermutation => false,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bitstream(e) => Some(e),
            Self::Coding(e) => Some(e),
            Self::Modular(e) => Some(e),
            Self::VarDct(e) => Some(e),
            Self::InvalidTocPermutation => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitstream(e) => write!(f, "bitstream error: {e}"),
            Self::Coding(e) => write!(f, "entropy decoder error: {e}"),
            Self::Modular(e) => write!(f, "modular error: {e}"),
            Self::VarDct(e) => write!(f, "VarDCT error: {e}"),
            Self::InvalidTocPermutation => write!(f, "invalid TOC permutation"),
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

impl From<hematite_vardct::Error> for Error {
    fn from(e: hematite_vardct::Error) -> Self {
        Self::VarDct(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
