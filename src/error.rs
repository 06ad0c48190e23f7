//! Error types for the voice streaming engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operation not valid for the player's current state.
///
/// Always returned before any side effect takes place.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    #[error("Player is already playing")]
    AlreadyPlaying,

    #[error("Player has been destroyed")]
    Destroyed,
}

/// Failures talking to the outside world: the decode process, its pipes,
/// the connection, or the codec.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to spawn decode process `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Decode process has no stdout pipe")]
    MissingPipe,

    #[error("Speaking signal failed: {0}")]
    Signal(String),

    #[error("Codec failure: {0}")]
    Codec(#[from] CodecError),
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_converts() {
        let err: Error = UsageError::Destroyed.into();
        assert!(matches!(err, Error::Usage(UsageError::Destroyed)));
        assert_eq!(err.to_string(), "Usage error: Player has been destroyed");
    }

    #[test]
    fn test_codec_error_wraps_into_transport() {
        let err: TransportError = CodecError::InvalidFrameSize(3).into();
        assert_eq!(err.to_string(), "Codec failure: Invalid frame size: 3");
    }
}
