#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The source ran out of bytes before the current decode step finished.
    ///
    /// This is the only recoverable error; callers may supply more input and
    /// retry from the last checkpoint.
    ShortRead,
    /// The input is not a JPEG XL codestream or container.
    InvalidSignature,
    /// Container box size was invalid.
    InvalidBoxSize,
    /// Container box violates cardinality or ordering rules.
    InvalidBox(&'static str),
    /// A `brob` box wraps a codestream-class box, which cannot be decoded.
    BrotliBox,
    /// `ZeroPadToByte` read non-zero bits.
    NonZeroPadding,
    /// Parsed half-float was Infinity or NaN.
    InvalidFloat,
    /// Parsed value couldn't be represented with the given enum.
    InvalidEnum { name: &'static str, value: u32 },
    /// The bitstream is invalid.
    ValidationFailed(&'static str),
    /// The codestream exceeds the limits of the supported profile.
    ProfileConformance(&'static str),
    /// The codestream is valid but uses a feature this decoder does not
    /// implement.
    Unsupported(&'static str),
    /// A name field was not valid UTF-8.
    NonUtf8Name,
}

impl Error {
    /// Returns whether the error is a recoverable short read.
    #[inline]
    pub fn unexpected_eof(&self) -> bool {
        matches!(self, Self::ShortRead)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortRead => write!(f, "unexpected end of input"),
            Self::InvalidSignature => write!(f, "not a JPEG XL image"),
            Self::InvalidBoxSize => write!(f, "invalid container box size"),
            Self::InvalidBox(msg) => write!(f, "invalid container box: {msg}"),
            Self::BrotliBox => write!(f, "brotli-compressed codestream box is not supported"),
            Self::NonZeroPadding => write!(f, "ZeroPadToByte() read non-zero bits"),
            Self::InvalidFloat => write!(f, "F16() read NaN or Infinity"),
            Self::InvalidEnum { name, value } => {
                write!(f, "Enum({name}) read invalid enum value of {value}")
            }
            Self::ValidationFailed(msg) => write!(f, "bitstream validation failed: {msg}"),
            Self::ProfileConformance(msg) => {
                write!(f, "not supported by current profile: {msg}")
            }
            Self::Unsupported(msg) => write!(f, "unsupported feature: {msg}"),
            Self::NonUtf8Name => write!(f, "read non-UTF-8 name"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
