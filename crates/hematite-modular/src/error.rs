#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    Bitstream(hematite_bitstream::Error),
    Coding(hematite_coding::Error),
    /// MA tree is too large, too deep, or never terminates.
    InvalidMaTree,
    /// A leaf referenced a predictor id outside 0..=13.
    InvalidPredictor(u32),
    /// RCT parameters reference channels that don't exist or don't match.
    InvalidRctParams,
    /// Palette parameters reference channels that don't exist or don't match.
    InvalidPaletteParams,
    /// Squeeze parameters are out of range.
    InvalidSqueezeParams,
    /// A decoded sample fell outside the 16-bit sample range.
    SampleOutOfRange,
    /// `use_global_tree` was set but no global MA tree exists.
    GlobalMaTreeNotAvailable,
}

impl Error {
    #[inline]
    pub fn unexpected_eof(&self) -> bool {
        match self {
            Self::Bitstream(e) => e.unexpected_eof(),
            Self::Coding(e) => e.unexpected_eof(),
            _ => false,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bitstream(e) => Some(e),
            Self::Coding(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitstream(e) => write!(f, "bitstream error: {e}"),
            Self::Coding(e) => write!(f, "entropy decoder error: {e}"),
            Self::InvalidMaTree => write!(f, "invalid meta-adaptive tree"),
            Self::InvalidPredictor(id) => write!(f, "invalid predictor {id}"),
            Self::InvalidRctParams => write!(f, "invalid RCT transform parameters"),
            Self::InvalidPaletteParams => write!(f, "invalid palette transform parameters"),
            Self::InvalidSqueezeParams => write!(f, "invalid squeeze transform parameters"),
            Self::SampleOutOfRange => write!(f, "decoded sample out of 16-bit range"),
            Self::GlobalMaTreeNotAvailable => {
                write!(f, "global meta-adaptive tree requested but not present")
            }
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

pub type Result<T> = std::result::Result<T, Error>;
