//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field is optional; omitted values fall back to the
//! defaults the rover was tuned with (six channels, 30% neutral, 115200 baud).

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::channels::{ChannelId, Side};
use crate::error::{Result, RoverBridgeError};
use crate::link::frame::{MAX_CHANNEL_ID, MAX_DUTY};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelSpec>,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial link to the motor microcontroller
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    /// Paths tried after `port`, in order
    #[serde(default = "default_fallback_ports")]
    pub fallback_ports: Vec<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_reconnect_max_interval_ms")]
    pub reconnect_max_interval_ms: u64,

    /// Wait after opening the port while the board boots
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// DTR low time when forcing a board reset
    #[serde(default = "default_reset_pulse_ms")]
    pub reset_pulse_ms: u64,

    /// Wait after a forced reset before the board accepts frames
    #[serde(default = "default_reset_settle_ms")]
    pub reset_settle_ms: u64,

    /// Pause between neutralizing the motors and pulling DTR
    #[serde(default = "default_neutral_pause_ms")]
    pub neutral_pause_ms: u64,
}

/// Input device configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerConfig {
    /// Explicit `/dev/input/eventN` path; empty means auto-detect
    #[serde(default)]
    pub device_path: String,

    #[serde(default = "default_device_retry_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_left_x_axis")]
    pub left_x_axis: u8,

    #[serde(default = "default_left_y_axis")]
    pub left_y_axis: u8,

    #[serde(default = "default_right_y_axis")]
    pub right_y_axis: u8,

    #[serde(default = "default_solo_mapping")]
    pub solo_mapping: SoloMapping,
}

/// What the sticks do in solo mode
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SoloMapping {
    /// Left stick X/Y mixed onto both banks
    Mix,
    /// Tank drive with the rear as the front: left stick Y drives the right
    /// bank, inverted right stick Y drives the left bank
    Reversed,
}

/// Where final duty values are delivered
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Remote microcontroller over the serial link
    Serial,
    /// Local GPIO software PWM
    Pwm,
}

/// Stick-to-duty transform and ramping
#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    #[serde(default = "default_sink")]
    pub sink: SinkKind,

    /// Zero-motion duty percentage
    #[serde(default = "default_neutral")]
    pub neutral: f32,

    #[serde(default = "default_gain")]
    pub gain: f32,

    #[serde(default = "default_dead_zone_low")]
    pub dead_zone_low: f32,

    #[serde(default = "default_dead_zone_high")]
    pub dead_zone_high: f32,

    /// Largest duty change per applied command
    #[serde(default = "default_step_size")]
    pub step_size: f32,

    /// Neutral offset for the left bank's mechanical bias
    #[serde(default)]
    pub trim_left: f32,

    /// Neutral offset for the right bank's mechanical bias
    #[serde(default)]
    pub trim_right: f32,

    #[serde(default = "default_pwm_frequency_hz")]
    pub pwm_frequency_hz: f64,
}

/// One motor output
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChannelSpec {
    pub id: ChannelId,
    pub side: Side,

    /// BCM pin, required for the PWM sink
    #[serde(default)]
    pub pin: Option<u8>,

    #[serde(default = "default_channel_min")]
    pub min: f32,

    #[serde(default = "default_channel_max")]
    pub max: f32,
}

/// RGB status LED
#[derive(Debug, Deserialize, Clone)]
pub struct IndicatorConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_red_pin")]
    pub red_pin: u8,

    #[serde(default = "default_green_pin")]
    pub green_pin: u8,

    #[serde(default = "default_blue_pin")]
    pub blue_pin: u8,
}

/// JSONL session journal
#[derive(Debug, Deserialize, Clone)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_journal_path")]
    pub path: String,
}

/// Log output
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Mirror log output to this file; empty disables the mirror
    #[serde(default)]
    pub file: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_fallback_ports() -> Vec<String> { vec!["/dev/ttyUSB0".to_string()] }
fn default_baud_rate() -> u32 { 115200 }
fn default_ack_timeout_ms() -> u64 { 500 }
fn default_reconnect_interval_ms() -> u64 { 1000 }
fn default_reconnect_max_interval_ms() -> u64 { 8000 }
fn default_settle_delay_ms() -> u64 { 1800 }
fn default_reset_pulse_ms() -> u64 { 100 }
fn default_reset_settle_ms() -> u64 { 2000 }
fn default_neutral_pause_ms() -> u64 { 500 }

fn default_device_retry_ms() -> u64 { 2000 }
fn default_left_x_axis() -> u8 { 0 }
fn default_left_y_axis() -> u8 { 1 }
fn default_right_y_axis() -> u8 { 3 }
fn default_solo_mapping() -> SoloMapping { SoloMapping::Mix }

fn default_sink() -> SinkKind { SinkKind::Serial }
fn default_neutral() -> f32 { 30.0 }
fn default_gain() -> f32 { 10.0 }
fn default_dead_zone_low() -> f32 { -0.01 }
fn default_dead_zone_high() -> f32 { 0.09 }
fn default_step_size() -> f32 { 1.0 }
fn default_pwm_frequency_hz() -> f64 { 200.0 }

fn default_channel_min() -> f32 { 20.0 }
fn default_channel_max() -> f32 { 40.0 }

fn default_red_pin() -> u8 { 2 }
fn default_green_pin() -> u8 { 3 }
fn default_blue_pin() -> u8 { 4 }

fn default_journal_path() -> String { "./logs/session.jsonl".to_string() }
fn default_log_level() -> String { "info".to_string() }

/// Six-wheel layout: channels 1-3 on the left bank, 4-6 on the right.
fn default_channels() -> Vec<ChannelSpec> {
    [(1, Side::Left, 1), (2, Side::Left, 16), (3, Side::Left, 20),
     (4, Side::Right, 0), (5, Side::Right, 5), (6, Side::Right, 6)]
        .into_iter()
        .map(|(id, side, pin)| ChannelSpec {
            id,
            side,
            pin: Some(pin),
            min: default_channel_min(),
            max: default_channel_max(),
        })
        .collect()
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            fallback_ports: default_fallback_ports(),
            baud_rate: default_baud_rate(),
            ack_timeout_ms: default_ack_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            reconnect_max_interval_ms: default_reconnect_max_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            reset_pulse_ms: default_reset_pulse_ms(),
            reset_settle_ms: default_reset_settle_ms(),
            neutral_pause_ms: default_neutral_pause_ms(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_path: String::new(),
            retry_interval_ms: default_device_retry_ms(),
            left_x_axis: default_left_x_axis(),
            left_y_axis: default_left_y_axis(),
            right_y_axis: default_right_y_axis(),
            solo_mapping: default_solo_mapping(),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            sink: default_sink(),
            neutral: default_neutral(),
            gain: default_gain(),
            dead_zone_low: default_dead_zone_low(),
            dead_zone_high: default_dead_zone_high(),
            step_size: default_step_size(),
            trim_left: 0.0,
            trim_right: 0.0,
            pwm_frequency_hz: default_pwm_frequency_hz(),
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            red_pin: default_red_pin(),
            green_pin: default_green_pin(),
            blue_pin: default_blue_pin(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_journal_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

impl SerialConfig {
    /// All device paths to try, primary port first.
    pub fn device_paths(&self) -> Vec<String> {
        std::iter::once(self.port.clone())
            .chain(self.fallback_ports.iter().cloned())
            .collect()
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn reconnect_max_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_interval_ms)
    }
}

impl DriveConfig {
    /// Neutral duty for a bank, including its trim.
    pub fn neutral_for(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.neutral + self.trim_left,
            Side::Right => self.neutral + self.trim_right,
        }
    }
}

fn invalid(msg: impl Into<String>) -> RoverBridgeError {
    RoverBridgeError::Configuration(msg.into())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rover_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// ```
    /// use rover_bridge::config::Config;
    ///
    /// let config = Config::from_toml_str("[drive]\nneutral = 28.0\n")?;
    /// assert_eq!(config.channels.len(), 6);
    /// # Ok::<(), rover_bridge::error::RoverBridgeError>(())
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if any value is out of its valid range. These
    /// errors are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        self.validate_serial()?;
        self.validate_controller()?;
        self.validate_drive()?;
        self.validate_channels()?;
        self.validate_outputs()
    }

    fn validate_serial(&self) -> Result<()> {
        let serial = &self.serial;

        if serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if serial.fallback_ports.iter().any(String::is_empty) {
            return Err(invalid("fallback_ports cannot contain empty paths"));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400].contains(&serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400",
            ));
        }

        if serial.ack_timeout_ms == 0 || serial.ack_timeout_ms > 10000 {
            return Err(invalid("ack_timeout_ms must be between 1 and 10000"));
        }

        if serial.reconnect_interval_ms == 0 || serial.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if serial.reconnect_max_interval_ms < serial.reconnect_interval_ms
            || serial.reconnect_max_interval_ms > 60000
        {
            return Err(invalid(
                "reconnect_max_interval_ms must be between reconnect_interval_ms and 60000",
            ));
        }

        if serial.reset_pulse_ms == 0 || serial.reset_pulse_ms > 1000 {
            return Err(invalid("reset_pulse_ms must be between 1 and 1000"));
        }

        for (name, value) in [
            ("settle_delay_ms", serial.settle_delay_ms),
            ("reset_settle_ms", serial.reset_settle_ms),
            ("neutral_pause_ms", serial.neutral_pause_ms),
        ] {
            if value > 10000 {
                return Err(invalid(format!("{} must be at most 10000", name)));
            }
        }

        Ok(())
    }

    fn validate_controller(&self) -> Result<()> {
        let controller = &self.controller;

        if controller.retry_interval_ms == 0 || controller.retry_interval_ms > 60000 {
            return Err(invalid("controller retry_interval_ms must be between 1 and 60000"));
        }

        let axes = [controller.left_x_axis, controller.left_y_axis, controller.right_y_axis];
        if axes[0] == axes[1] || axes[0] == axes[2] || axes[1] == axes[2] {
            return Err(invalid("left_x_axis, left_y_axis and right_y_axis must be distinct"));
        }

        Ok(())
    }

    fn validate_drive(&self) -> Result<()> {
        let drive = &self.drive;

        if !drive.gain.is_finite() || drive.gain <= 0.0 {
            return Err(invalid("gain must be a positive number"));
        }

        if !drive.step_size.is_finite() || drive.step_size <= 0.0 {
            return Err(invalid("step_size must be a positive number"));
        }

        if !(-1.0..=1.0).contains(&drive.dead_zone_low)
            || !(-1.0..=1.0).contains(&drive.dead_zone_high)
        {
            return Err(invalid("dead zone bounds must be between -1.0 and 1.0"));
        }

        if drive.dead_zone_low > drive.dead_zone_high {
            return Err(invalid("dead_zone_low must not exceed dead_zone_high"));
        }

        if !(0.0..=f32::from(MAX_DUTY)).contains(&drive.neutral) {
            return Err(invalid(format!("neutral must be between 0 and {}", MAX_DUTY)));
        }

        if !drive.pwm_frequency_hz.is_finite() || drive.pwm_frequency_hz <= 0.0 {
            return Err(invalid("pwm_frequency_hz must be a positive number"));
        }

        Ok(())
    }

    fn validate_channels(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(invalid("at least one channel must be configured"));
        }

        let mut seen = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            if channel.id == 0 || channel.id > MAX_CHANNEL_ID {
                return Err(invalid(format!(
                    "channel id {} is out of bounds (must be 1-{})",
                    channel.id, MAX_CHANNEL_ID
                )));
            }

            if seen.contains(&channel.id) {
                return Err(invalid(format!("channel id {} is configured twice", channel.id)));
            }
            seen.push(channel.id);

            if channel.min < 0.0 || channel.max > f32::from(MAX_DUTY) || channel.min >= channel.max {
                return Err(invalid(format!(
                    "channel {} range must satisfy 0 <= min < max <= {}",
                    channel.id, MAX_DUTY
                )));
            }

            let neutral = self.drive.neutral_for(channel.side);
            if neutral < channel.min || neutral > channel.max {
                return Err(invalid(format!(
                    "channel {} neutral {} is outside its range {}-{}",
                    channel.id, neutral, channel.min, channel.max
                )));
            }
        }

        Ok(())
    }

    fn validate_outputs(&self) -> Result<()> {
        let mut pins: Vec<u8> = Vec::new();

        if self.drive.sink == SinkKind::Pwm {
            for channel in &self.channels {
                let pin = channel.pin.ok_or_else(|| {
                    invalid(format!("channel {} needs a pin for the pwm sink", channel.id))
                })?;
                if pins.contains(&pin) {
                    return Err(invalid(format!("pin {} is assigned twice", pin)));
                }
                pins.push(pin);
            }
        }

        if self.indicator.enabled {
            for pin in [self.indicator.red_pin, self.indicator.green_pin, self.indicator.blue_pin] {
                if pins.contains(&pin) {
                    return Err(invalid(format!("pin {} is assigned twice", pin)));
                }
                pins.push(pin);
            }
        }

        if self.journal.enabled && self.journal.path.is_empty() {
            return Err(invalid("journal path cannot be empty when enabled"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}
