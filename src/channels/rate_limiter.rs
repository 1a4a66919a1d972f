//! # Rate Limiter
//!
//! Bounds how far a channel's duty may move in one applied command.
//!
//! The limiter is driven by commands, not by a clock: each stick event moves
//! the output one step closer to where the stick points. A target closer than
//! one step is reached exactly.
//!
//! ```
//! use rover_bridge::channels::rate_limiter::RateLimiter;
//!
//! let limiter = RateLimiter::new(1.0);
//! assert_eq!(limiter.step(30.0, 20.0), 29.0);
//! assert_eq!(limiter.step(29.0, 28.5), 28.5);
//! assert_eq!(limiter.steps_to_converge(30.0, 20.0), 10);
//! ```

/// Per-update slew limit shared by every channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiter {
    step_size: f32,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self { step_size: 1.0 }
    }
}

impl RateLimiter {
    /// Creates a limiter moving at most `step_size` percent per update.
    ///
    /// Non-positive or non-finite sizes fall back to the default of 1.0.
    #[must_use]
    pub fn new(step_size: f32) -> Self {
        if step_size.is_finite() && step_size > 0.0 {
            Self { step_size }
        } else {
            Self::default()
        }
    }

    #[must_use]
    pub fn step_size(&self) -> f32 {
        self.step_size
    }

    /// Next output moving from `current` toward `target`.
    #[must_use]
    pub fn step(&self, current: f32, target: f32) -> f32 {
        let delta = target - current;
        if delta.abs() >= self.step_size {
            current + self.step_size.copysign(delta)
        } else {
            target
        }
    }

    /// Updates needed to reach `target` from `current`.
    #[must_use]
    pub fn steps_to_converge(&self, current: f32, target: f32) -> u32 {
        ((target - current).abs() / self.step_size).ceil() as u32
    }
}
