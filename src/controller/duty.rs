//! # Duty Cycle Mapper
//!
//! Converts a normalized stick signal into a motor duty percentage.
//!
//! ## Transfer Function
//!
//! ```text
//! dead_zone_low <= s <= dead_zone_high  ->  neutral
//! otherwise                             ->  neutral - gain * s
//! ```
//!
//! The sign is inverted because pushing a stick forward reads negative on the
//! Y axis, and forward needs a duty below neutral on the motor controllers.
//!
//! The default dead zone `[-0.01, 0.09]` is lopsided; it matches the resting
//! offset of the gamepads the rover was tuned with.
//!
//! ## Usage
//!
//! ```
//! use rover_bridge::controller::duty::DutyCycleMapper;
//!
//! let mapper = DutyCycleMapper::default();
//!
//! // Resting stick
//! assert_eq!(mapper.map(0.05), 30.0);
//!
//! // Full throttle backwards
//! assert_eq!(mapper.map(1.0), 20.0);
//! ```

use crate::channels::Side;
use crate::config::DriveConfig;

/// Stick signal to duty percentage with a dead zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCycleMapper {
    /// Duty at rest, trim included.
    neutral: f32,
    /// Duty change per unit of signal.
    gain: f32,
    dead_zone_low: f32,
    dead_zone_high: f32,
}

impl Default for DutyCycleMapper {
    fn default() -> Self {
        Self {
            neutral: 30.0,
            gain: 10.0,
            dead_zone_low: -0.01,
            dead_zone_high: 0.09,
        }
    }
}

impl DutyCycleMapper {
    /// Creates a mapper.
    ///
    /// # Arguments
    ///
    /// * `neutral` - Duty returned inside the dead zone
    /// * `gain` - Duty change for a full-scale signal
    /// * `dead_zone` - Inclusive `(low, high)` signal band treated as rest
    #[must_use]
    pub fn new(neutral: f32, gain: f32, dead_zone: (f32, f32)) -> Self {
        Self {
            neutral,
            gain,
            dead_zone_low: dead_zone.0,
            dead_zone_high: dead_zone.1,
        }
    }

    /// Mapper for one bank, using that side's trimmed neutral.
    #[must_use]
    pub fn for_side(drive: &DriveConfig, side: Side) -> Self {
        Self::new(
            drive.neutral_for(side),
            drive.gain,
            (drive.dead_zone_low, drive.dead_zone_high),
        )
    }

    #[must_use]
    pub fn neutral(&self) -> f32 {
        self.neutral
    }

    #[must_use]
    pub fn dead_zone(&self) -> (f32, f32) {
        (self.dead_zone_low, self.dead_zone_high)
    }

    /// Maps a signal in `[-1, 1]` to a duty percentage.
    ///
    /// Signals outside `[-1, 1]` are clamped first; a non-finite signal maps to
    /// neutral.
    ///
    /// # Examples
    ///
    /// ```
    /// use rover_bridge::controller::duty::DutyCycleMapper;
    ///
    /// let mapper = DutyCycleMapper::new(28.0, 10.0, (-0.01, 0.09));
    /// assert_eq!(mapper.map(0.0), 28.0);
    /// assert_eq!(mapper.map(-0.5), 33.0);
    /// ```
    #[must_use]
    pub fn map(&self, signal: f32) -> f32 {
        if !signal.is_finite() {
            return self.neutral;
        }
        let signal = signal.clamp(-1.0, 1.0);
        if (self.dead_zone_low..=self.dead_zone_high).contains(&signal) {
            return self.neutral;
        }
        -self.gain * signal + self.neutral
    }
}
