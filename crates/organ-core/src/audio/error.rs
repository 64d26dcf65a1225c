//! Audio backend error types

use thiserror::Error;

/// Errors that can occur while opening or driving the output stream
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start or pause the stream
    #[error("Failed to control audio stream: {0}")]
    StreamControlError(String),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
