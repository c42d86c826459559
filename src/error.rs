use std::{error, fmt, io};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by polyslot.
#[derive(Debug)]
pub enum Error {
    EngineNotInitialized,
    InvalidBpm,
    InvalidCycleCount,
    NoActiveSlots,
    EmptyExport,
    MediaFileNotFound,
    MediaFileProbeError,
    MediaFilesMissing(Vec<String>),
    AudioDecodingError(Box<dyn error::Error + Send + Sync>),
    FileWriteError(Box<dyn error::Error + Send + Sync>),
    IoError(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineNotInitialized => write!(f, "Audio engine is not initialised"),
            Self::InvalidBpm => write!(f, "Master BPM must be greater than zero"),
            Self::InvalidCycleCount => write!(f, "Number of cycles must be positive"),
            Self::NoActiveSlots => write!(f, "No active slots to export"),
            Self::EmptyExport => write!(f, "Export length is zero"),
            Self::MediaFileNotFound => write!(f, "Audio file not found"),
            Self::MediaFileProbeError => write!(f, "Audio file failed to probe"),
            Self::MediaFilesMissing(paths) => {
                write!(f, "Missing audio files:\n{}", paths.join("\n"))
            }
            Self::AudioDecodingError(err) | Self::FileWriteError(err) => err.fmt(f),
            Self::IoError(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}
