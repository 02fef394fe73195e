use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadAddress(String),
    DirectoryDoesNotExist(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadAddress(e) => write!(f, "Address formatting error: {}", e),
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures surfaced by a capture session.
///
/// Only sink I/O can fail. Address normalization and no-op state transitions
/// are handled locally and never show up here.
#[derive(Debug)]
pub enum CaptureError {
    /// Writing an encoded record batch failed. The session is closed.
    SinkWriteFailure(std::io::Error),
    /// Closing an owned sink failed. The session is closed anyway.
    SinkCloseFailure(std::io::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::SinkWriteFailure(e) => write!(f, "Capture sink write failed: {}", e),
            CaptureError::SinkCloseFailure(e) => write!(f, "Capture sink close failed: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::SinkWriteFailure(e) | CaptureError::SinkCloseFailure(e) => Some(e),
        }
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    AcceptError(std::io::Error),
    ConnectionFailed(std::io::Error),
    StreamError(std::io::Error),
    SinkError(std::io::Error),
    CaptureError(CaptureError),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::AcceptError(e) => write!(f, "Accept failed: {}", e),
            NetworkError::ConnectionFailed(e) => write!(f, "Upstream connection failed: {}", e),
            NetworkError::StreamError(e) => write!(f, "Stream error: {}", e),
            NetworkError::SinkError(e) => write!(f, "Capture file error: {}", e),
            NetworkError::CaptureError(e) => write!(f, "Capture error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<CaptureError> for NetworkError {
    fn from(err: CaptureError) -> Self {
        NetworkError::CaptureError(err)
    }
}
