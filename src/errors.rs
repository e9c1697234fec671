use crate::focus::DriveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LensAfError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Autofocus already running")]
    AlreadyRunning,
    #[error("Lens drive error: {0}")]
    Drive(String),
    #[error("Detector error: {0}")]
    Detector(String),
    #[error("Report error: {0}")]
    Report(String),
    #[error("Config file error: {0}")]
    ConfigFile(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DriveError> for LensAfError {
    fn from(err: DriveError) -> Self {
        LensAfError::Drive(err.to_string())
    }
}

impl From<serde_json::Error> for LensAfError {
    fn from(err: serde_json::Error) -> Self {
        LensAfError::Report(err.to_string())
    }
}

impl From<config::ConfigError> for LensAfError {
    fn from(err: config::ConfigError) -> Self {
        LensAfError::ConfigFile(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let err = LensAfError::InvalidConfig("step size is zero".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: step size is zero");

        let err = LensAfError::AlreadyRunning;
        assert_eq!(err.to_string(), "Autofocus already running");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: LensAfError = io.into();
        assert!(matches!(err, LensAfError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_drive_error_conversion() {
        let err: LensAfError = DriveError::Rejected("busy".to_string()).into();
        assert_eq!(err.to_string(), "Lens drive error: lens command rejected: busy");
    }
}
