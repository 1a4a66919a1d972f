//! # Error Types
//!
//! Custom error types for Rover Bridge using `thiserror`.

use std::time::Duration;
use thiserror::Error;

use crate::channels::ChannelId;

/// Main error type for Rover Bridge
#[derive(Debug, Error)]
pub enum RoverBridgeError {
    /// No input device could be opened, or the open device went away
    #[error("Input device unavailable: {0}")]
    InputUnavailable(String),

    /// A command referenced a channel id that is not in the channel table
    #[error("Channel {0} is not configured")]
    ChannelOutOfRange(ChannelId),

    /// Writing a frame to the microcontroller failed
    #[error("Link write failed: {0}")]
    LinkWriteFailure(String),

    /// The microcontroller did not acknowledge a frame in time
    #[error("No acknowledgement within {0:?}")]
    LinkReadStall(Duration),

    /// Reading the acknowledgement failed or the port closed
    #[error("Link read failed: {0}")]
    LinkReadFailure(String),

    /// None of the serial device paths could be opened
    #[error("Serial port not found (tried: {0})")]
    LinkUnavailable(String),

    /// A value does not fit the link's fixed-width frame
    #[error("Frame error: {0}")]
    Frame(String),

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration file is not valid TOML for the expected schema
    #[error("Configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// GPIO errors from the local PWM sink or status LED
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RoverBridgeError {
    /// Returns `true` for transient conditions the control loop logs and rides out.
    ///
    /// Configuration, GPIO and plain I/O errors are fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InputUnavailable(_)
                | Self::ChannelOutOfRange(_)
                | Self::LinkWriteFailure(_)
                | Self::LinkReadStall(_)
                | Self::LinkReadFailure(_)
                | Self::LinkUnavailable(_)
        )
    }
}

/// Result type alias for Rover Bridge
pub type Result<T> = std::result::Result<T, RoverBridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_recoverable() {
        assert!(RoverBridgeError::InputUnavailable("gone".into()).is_recoverable());
        assert!(RoverBridgeError::ChannelOutOfRange(7).is_recoverable());
        assert!(RoverBridgeError::LinkWriteFailure("EPIPE".into()).is_recoverable());
        assert!(RoverBridgeError::LinkReadStall(Duration::from_millis(500)).is_recoverable());
        assert!(RoverBridgeError::LinkReadFailure("port closed".into()).is_recoverable());
        assert!(RoverBridgeError::LinkUnavailable("/dev/ttyACM0".into()).is_recoverable());
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(!RoverBridgeError::Configuration("no channels".into()).is_recoverable());
        assert!(!RoverBridgeError::Frame("channel 12".into()).is_recoverable());
        assert!(!RoverBridgeError::Io(std::io::Error::other("EIO")).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = RoverBridgeError::ChannelOutOfRange(8);
        assert_eq!(err.to_string(), "Channel 8 is not configured");

        let err = RoverBridgeError::LinkUnavailable("/dev/ttyACM0, /dev/ttyUSB0".into());
        assert!(err.to_string().contains("/dev/ttyUSB0"));
    }
}
