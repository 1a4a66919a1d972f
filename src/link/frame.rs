//! # Link Frame Codec
//!
//! Encodes duty commands into the decimal token the motor firmware parses.
//!
//! ## Wire Format
//!
//! A frame is the ASCII rendering of `channel * 100 + duty` with no separator
//! and no terminator:
//!
//! ```text
//! channel 1, duty 29  ->  "129"
//! channel 4, duty 30  ->  "430"
//! channel 6, duty 5   ->  "605"
//! ```
//!
//! The firmware reads the hundreds digit as the channel and the last two digits
//! as the duty percentage, so channels are limited to 1-9 and duty to 0-99.
//! Anything outside those widths would shift digits into the wrong field.

use bytes::Bytes;

use crate::channels::ChannelId;
use crate::error::{Result, RoverBridgeError};

/// Highest channel id that fits the single channel digit.
pub const MAX_CHANNEL_ID: ChannelId = 9;

/// Highest duty that fits the two duty digits.
pub const MAX_DUTY: u8 = 99;

/// Weight of the channel digit in the token.
pub const CHANNEL_MULTIPLIER: u16 = 100;

/// One command on the wire.
///
/// # Examples
///
/// ```
/// use rover_bridge::link::frame::LinkFrame;
///
/// let frame = LinkFrame::from_duty(1, 29.4)?;
/// assert_eq!(frame.token(), 129);
/// assert_eq!(&frame.encode()[..], b"129");
/// # Ok::<(), rover_bridge::error::RoverBridgeError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFrame {
    channel: ChannelId,
    duty: u8,
}

impl LinkFrame {
    /// Creates a frame from an exact integer duty.
    ///
    /// # Errors
    ///
    /// Returns `Frame` if the channel is not 1-9 or the duty exceeds 99.
    pub fn new(channel: ChannelId, duty: u8) -> Result<Self> {
        if channel == 0 || channel > MAX_CHANNEL_ID {
            return Err(RoverBridgeError::Frame(format!(
                "channel {} does not fit the frame (must be 1-{})",
                channel, MAX_CHANNEL_ID
            )));
        }
        if duty > MAX_DUTY {
            return Err(RoverBridgeError::Frame(format!(
                "duty {} does not fit the frame (must be 0-{})",
                duty, MAX_DUTY
            )));
        }
        Ok(Self { channel, duty })
    }

    /// Creates a frame from a fractional duty, rounding to the nearest percent
    /// and clamping into 0-99.
    ///
    /// # Errors
    ///
    /// Returns `Frame` for an out-of-range channel or a non-finite duty.
    pub fn from_duty(channel: ChannelId, duty: f32) -> Result<Self> {
        if !duty.is_finite() {
            return Err(RoverBridgeError::Frame(format!("duty {} is not a number", duty)));
        }
        let rounded = duty.round().clamp(0.0, f32::from(MAX_DUTY)) as u8;
        Self::new(channel, rounded)
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn duty(&self) -> u8 {
        self.duty
    }

    /// Numeric value of the frame: `channel * 100 + duty`.
    pub fn token(&self) -> u16 {
        u16::from(self.channel) * CHANNEL_MULTIPLIER + u16::from(self.duty)
    }

    /// ASCII bytes written to the serial port.
    pub fn encode(&self) -> Bytes {
        Bytes::from(self.token().to_string())
    }

    /// Parses a token back into its channel and duty.
    ///
    /// Accepts exactly three ASCII digits, optionally surrounded by whitespace.
    ///
    /// # Errors
    ///
    /// Returns `Frame` if the text is not a three-digit token.
    ///
    /// # Examples
    ///
    /// ```
    /// use rover_bridge::link::frame::LinkFrame;
    ///
    /// let frame = LinkFrame::decode("430")?;
    /// assert_eq!((frame.channel(), frame.duty()), (4, 30));
    /// # Ok::<(), rover_bridge::error::RoverBridgeError>(())
    /// ```
    pub fn decode(text: &str) -> Result<Self> {
        let digits = text.trim();
        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RoverBridgeError::Frame(format!(
                "'{}' is not a three-digit frame",
                digits
            )));
        }

        let token: u16 = digits
            .parse()
            .map_err(|e| RoverBridgeError::Frame(format!("'{}': {}", digits, e)))?;

        // Three digits keep both fields within u8.
        let channel = (token / CHANNEL_MULTIPLIER) as ChannelId;
        let duty = (token % CHANNEL_MULTIPLIER) as u8;
        Self::new(channel, duty)
    }
}

impl std::fmt::Display for LinkFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}
