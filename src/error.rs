use thiserror::Error;

/// Main error type for the timeline compositor
///
/// The variants mirror the failure taxonomy reported back to callers through
/// [`ToolResult`](crate::ops::ToolResult). None of them are retried by the
/// engine itself.
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Source not found: {path}")]
    SourceNotFound { path: String },

    #[error("Invalid parameters: {details}")]
    InvalidParameters { details: String },

    #[error("Invalid parameters for effect '{effect}': {parameter} - {reason}")]
    InvalidEffectParameters {
        effect: String,
        parameter: String,
        reason: String,
    },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Codec failure: {reason}")]
    CodecFailure { reason: String },

    #[error("No audio track found in: {path}")]
    NoAudioTrack { path: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path} ({reason})")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using CompositorError
pub type Result<T> = std::result::Result<T, CompositorError>;

impl CompositorError {
    pub fn invalid<S: Into<String>>(details: S) -> Self {
        Self::InvalidParameters {
            details: details.into(),
        }
    }

    pub fn effect<E, P, R>(effect: E, parameter: P, reason: R) -> Self
    where
        E: Into<String>,
        P: Into<String>,
        R: Into<String>,
    {
        Self::InvalidEffectParameters {
            effect: effect.into(),
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub fn codec<S: Into<String>>(reason: S) -> Self {
        Self::CodecFailure {
            reason: reason.into(),
        }
    }

    pub fn not_found<P: AsRef<std::path::Path>>(path: P) -> Self {
        Self::SourceNotFound {
            path: path.as_ref().display().to_string(),
        }
    }

    /// Stable snake_case tag for this failure, used in tool results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound { .. } => "source_not_found",
            Self::InvalidParameters { .. } | Self::InvalidEffectParameters { .. } => {
                "invalid_parameters"
            }
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::CodecFailure { .. } => "codec_failure",
            Self::NoAudioTrack { .. } => "no_audio_track",
            Self::Config(_) => "invalid_parameters",
            Self::Io(_) => "codec_failure",
        }
    }

    /// Effect parameter errors are a refinement of invalid parameters
    pub fn is_invalid_parameters(&self) -> bool {
        self.kind() == "invalid_parameters"
    }

    /// The engine never retries on its own; retry policy belongs to the caller.
    pub fn is_recoverable(&self) -> bool {
        false
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::SourceNotFound { path } => {
                format!("Source file '{}' not found. Please check the path exists and is readable.", path)
            }
            Self::NoAudioTrack { path } => {
                format!("Video file '{}' has no audio track", path)
            }
            Self::UnsupportedFormat { format } => {
                format!("Format '{}' is not supported. Supported containers: mp4, mov, mkv, avi, webm", format)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_errors_report_as_invalid_parameters() {
        let err = CompositorError::effect("crop", "x2", "must be greater than x1");
        assert_eq!(err.kind(), "invalid_parameters");
        assert!(err.is_invalid_parameters());
        assert!(err.to_string().contains("crop"));
        assert!(err.to_string().contains("x2"));
    }

    #[test]
    fn nothing_is_retried() {
        let err = CompositorError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!err.is_recoverable());
        assert_eq!(err.kind(), "codec_failure");
    }

    #[test]
    fn missing_source_message_names_path() {
        let err = CompositorError::not_found("/tmp/missing.mp4");
        assert_eq!(err.kind(), "source_not_found");
        assert!(err.user_message().contains("/tmp/missing.mp4"));
    }
}
