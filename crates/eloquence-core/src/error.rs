//! Error types for the Eloquence audio pipeline.

/// Result type alias for pipeline operations
pub type EloquenceResult<T> = Result<T, EloquenceError>;

/// Main error type for the synthesis and audio-delivery pipeline
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EloquenceError {
    /// The native synthesis engine could not be created or driven
    #[error("Synthesis engine error: {message}")]
    EngineError {
        /// Error message describing the failure
        message: String,
    },

    /// Audio device error (enumeration, activation, open, feed)
    #[error("Audio device error: {message}")]
    AudioDeviceError {
        /// Error message describing the device issue
        message: String,
    },

    /// The device refused a buffer because it is busy (re)opening
    #[error("Audio device busy: {message}")]
    DeviceBusy {
        /// Error message reported by the device
        message: String,
    },

    /// Audio format or processing error
    #[error("Audio processing error: {message}")]
    AudioProcessingError {
        /// Error message describing the processing issue
        message: String,
    },

    /// An engine sample-rate code outside the supported table
    #[error("Invalid sample rate code {code}")]
    InvalidSampleRateCode {
        /// The rejected code
        code: i32,
    },

    /// Language or voice not known to the engine
    #[error("Voice '{voice_id}' not found")]
    VoiceNotFound {
        /// The voice or language identifier that was not found
        voice_id: String,
    },

    /// File I/O error
    #[error("File I/O error: {message}")]
    FileError {
        /// Error message describing the file operation failure
        message: String,
    },

    /// Invalid input error
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Error message describing the invalid input
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Thread or concurrency error
    #[error("Concurrency error: {message}")]
    ConcurrencyError {
        /// Error message describing the concurrency issue
        message: String,
    },
}

impl EloquenceError {
    /// Create a new engine error
    #[must_use]
    pub fn engine<S: Into<String>>(message: S) -> Self {
        Self::EngineError {
            message: message.into(),
        }
    }

    /// Create a new audio device error
    #[must_use]
    pub fn audio_device<S: Into<String>>(message: S) -> Self {
        Self::AudioDeviceError {
            message: message.into(),
        }
    }

    /// Create a new device busy error
    #[must_use]
    pub fn device_busy<S: Into<String>>(message: S) -> Self {
        Self::DeviceBusy {
            message: message.into(),
        }
    }

    /// Create a new audio processing error
    #[must_use]
    pub fn audio_processing<S: Into<String>>(message: S) -> Self {
        Self::AudioProcessingError {
            message: message.into(),
        }
    }

    /// Create a new invalid sample rate code error
    #[must_use]
    pub const fn invalid_sample_rate_code(code: i32) -> Self {
        Self::InvalidSampleRateCode { code }
    }

    /// Create a new voice not found error
    #[must_use]
    pub fn voice_not_found<S: Into<String>>(voice_id: S) -> Self {
        Self::VoiceNotFound {
            voice_id: voice_id.into(),
        }
    }

    /// Create a new file error
    #[must_use]
    pub fn file<S: Into<String>>(message: S) -> Self {
        Self::FileError {
            message: message.into(),
        }
    }

    /// Create a new invalid input error
    #[must_use]
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a new concurrency error
    #[must_use]
    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        Self::ConcurrencyError {
            message: message.into(),
        }
    }

    /// Check if this error is worth retrying
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::DeviceBusy { .. } | Self::AudioDeviceError { .. })
    }

    /// Check if this error is due to invalid caller input
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::InvalidSampleRateCode { .. }
                | Self::VoiceNotFound { .. }
                | Self::ConfigurationError { .. }
        )
    }

    /// Get the error category for logging
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::EngineError { .. } => "engine",
            Self::AudioDeviceError { .. } => "audio_device",
            Self::DeviceBusy { .. } => "device_busy",
            Self::AudioProcessingError { .. } => "audio_processing",
            Self::InvalidSampleRateCode { .. } => "sample_rate",
            Self::VoiceNotFound { .. } => "voice",
            Self::FileError { .. } => "file",
            Self::InvalidInput { .. } => "input",
            Self::ConfigurationError { .. } => "configuration",
            Self::ConcurrencyError { .. } => "concurrency",
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for EloquenceError {
    fn from(err: std::io::Error) -> Self {
        Self::file(err.to_string())
    }
}

impl From<toml::de::Error> for EloquenceError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(format!("Invalid TOML configuration: {err}"))
    }
}

impl From<hound::Error> for EloquenceError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(io) => Self::file(io.to_string()),
            other => Self::audio_processing(format!("WAV encoding error: {other}")),
        }
    }
}

impl From<rubato::ResamplerConstructionError> for EloquenceError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        Self::audio_processing(format!("Resampler setup failed: {err}"))
    }
}

impl From<rubato::ResampleError> for EloquenceError {
    fn from(err: rubato::ResampleError) -> Self {
        Self::audio_processing(format!("Resampling failed: {err}"))
    }
}

impl From<anyhow::Error> for EloquenceError {
    fn from(err: anyhow::Error) -> Self {
        Self::engine(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = EloquenceError::engine("Test engine error");
        assert_eq!(err.category(), "engine");
        assert!(!err.is_retriable());
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_error_display() {
        let err = EloquenceError::voice_not_found("xyz");
        assert_eq!(err.to_string(), "Voice 'xyz' not found");

        let err = EloquenceError::invalid_sample_rate_code(7);
        assert_eq!(err.to_string(), "Invalid sample rate code 7");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(EloquenceError::engine("test").category(), "engine");
        assert_eq!(EloquenceError::audio_device("test").category(), "audio_device");
        assert_eq!(EloquenceError::device_busy("test").category(), "device_busy");
        assert_eq!(EloquenceError::audio_processing("test").category(), "audio_processing");
        assert_eq!(EloquenceError::invalid_sample_rate_code(9).category(), "sample_rate");
        assert_eq!(EloquenceError::voice_not_found("test").category(), "voice");
        assert_eq!(EloquenceError::file("test").category(), "file");
        assert_eq!(EloquenceError::invalid_input("test").category(), "input");
        assert_eq!(EloquenceError::configuration("test").category(), "configuration");
        assert_eq!(EloquenceError::concurrency("test").category(), "concurrency");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(EloquenceError::device_busy("test").is_retriable());
        assert!(EloquenceError::audio_device("test").is_retriable());
        assert!(!EloquenceError::engine("test").is_retriable());
        assert!(!EloquenceError::invalid_input("test").is_retriable());
    }

    #[test]
    fn test_user_errors() {
        assert!(EloquenceError::invalid_input("test").is_user_error());
        assert!(EloquenceError::invalid_sample_rate_code(3).is_user_error());
        assert!(EloquenceError::voice_not_found("test").is_user_error());
        assert!(EloquenceError::configuration("test").is_user_error());
        assert!(!EloquenceError::engine("test").is_user_error());
        assert!(!EloquenceError::device_busy("test").is_user_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err = EloquenceError::from(io_err);
        assert!(matches!(err, EloquenceError::FileError { .. }));
    }

    #[test]
    fn test_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("missing eci.dll").context("loading engine");
        let converted = EloquenceError::from(err);
        assert!(matches!(converted, EloquenceError::EngineError { .. }));
        assert!(converted.to_string().contains("missing eci.dll"));
    }

    #[test]
    fn test_error_equality() {
        let err1 = EloquenceError::engine("test message");
        let err2 = EloquenceError::engine("test message");
        let err3 = EloquenceError::engine("different message");

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
