#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    Bitstream(hematite_bitstream::Error),
    Frame(hematite_frame::Error),
    /// A decoded section is missing or inconsistent with the frame header.
    IncompleteFrame(&'static str),
}

impl Error {
    #[inline]
    pub fn unexpected_eof(&self) -> bool {
        match self {
            Self::Bitstream(e) => e.unexpected_eof(),
            Self::Frame(e) => e.unexpected_eof(),
            Self::IncompleteFrame(_) => false,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bitstream(e) => Some(e),
            Self::Frame(e) => Some(e),
            Self::IncompleteFrame(_) => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitstream(e) => write!(f, "bitstream error: {e}"),
            Self::Frame(e) => write!(f, "frame error: {e}"),
            Self::IncompleteFrame(msg) => write!(f, "incomplete frame: {msg}"),
        }
    }
}

impl From<hematite_bitstream::Error> for Error {
    fn from(e: hematite_bitstream::Error) -> Self {
        Self::Bitstream(e)
    }
}

impl From<hematite_frame::Error> for Error {
    fn from(e: hematite_frame::Error) -> Self {
        Self::Frame(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
