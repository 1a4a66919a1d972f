//! # Channel Bank Module
//!
//! Owns the current duty of every motor channel and forwards ramped duties to
//! the actuator sink.
//!
//! ## Channel Layout
//!
//! | Channel | Side  | Default pin |
//! |---------|-------|-------------|
//! | 1-3     | Left  | 1, 16, 20   |
//! | 4-6     | Right | 0, 5, 6     |
//!
//! Every channel has a declared `[min, max]` range and a neutral duty where the
//! motor stands still (30% plus the side's trim by default).

pub mod rate_limiter;
pub mod sink;

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::{ChannelSpec, DriveConfig};
use crate::error::{Result, RoverBridgeError};
use rate_limiter::RateLimiter;
use sink::ActuatorSink;

/// Motor channel number, 1-9
pub type ChannelId = u8;

/// Motor bank a channel belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One motor output and its current duty
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    side: Side,
    min: f32,
    max: f32,
    neutral: f32,
    duty: Mutex<f32>,
}

impl Channel {
    /// Creates a channel resting at neutral.
    pub fn new(id: ChannelId, side: Side, min: f32, max: f32, neutral: f32) -> Self {
        Self {
            id,
            side,
            min,
            max,
            neutral,
            duty: Mutex::new(neutral),
        }
    }

    pub fn from_spec(spec: &ChannelSpec, drive: &DriveConfig) -> Self {
        Self::new(spec.id, spec.side, spec.min, spec.max, drive.neutral_for(spec.side))
    }

    pub fn duty(&self) -> f32 {
        *self.lock_duty()
    }

    // A panic while holding the lock can't leave a torn f32.
    fn lock_duty(&self) -> MutexGuard<'_, f32> {
        self.duty.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// All motor channels plus the sink their duties go to
///
/// The sink lock is held while a duty is computed, stored and forwarded, so a
/// `force_neutral` can't be overtaken by an older `apply`.
pub struct ChannelBank {
    channels: Vec<Channel>,
    limiter: RateLimiter,
    sink: tokio::sync::Mutex<Box<dyn ActuatorSink>>,
}

impl std::fmt::Debug for ChannelBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBank")
            .field("channels", &self.channels)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl ChannelBank {
    pub fn new(channels: Vec<Channel>, limiter: RateLimiter, sink: Box<dyn ActuatorSink>) -> Self {
        Self {
            channels,
            limiter,
            sink: tokio::sync::Mutex::new(sink),
        }
    }

    /// Builds a bank from the configured channel table.
    pub fn from_config(specs: &[ChannelSpec], drive: &DriveConfig, sink: Box<dyn ActuatorSink>) -> Self {
        let channels = specs.iter().map(|spec| Channel::from_spec(spec, drive)).collect();
        Self::new(channels, RateLimiter::new(drive.step_size), sink)
    }

    fn channel(&self, id: ChannelId) -> Result<&Channel> {
        self.channels
            .iter()
            .find(|c| c.id == id)
            .ok_or(RoverBridgeError::ChannelOutOfRange(id))
    }

    /// Move a channel one limited step toward `target` and forward the result.
    ///
    /// Returns the duty that was applied.
    ///
    /// # Errors
    ///
    /// - `ChannelOutOfRange` for an unknown channel
    /// - any error from the sink; the stored duty is kept either way
    pub async fn apply(&self, id: ChannelId, target: f32) -> Result<f32> {
        let channel = self.channel(id)?;
        let mut sink = self.sink.lock().await;

        let next = {
            let mut duty = channel.lock_duty();
            let next = self.limiter.step(*duty, target.clamp(channel.min, channel.max));
            *duty = next;
            next
        };

        debug!("Channel {} -> {} (target {})", id, next, target);
        sink.set_duty(id, next).await?;
        Ok(next)
    }

    /// Drive every channel straight to neutral.
    ///
    /// A sink failure on one channel is logged and the rest still get their
    /// neutral command.
    pub async fn force_neutral(&self) {
        let mut sink = self.sink.lock().await;
        self.neutral_all(&mut **sink).await;
    }

    async fn neutral_all(&self, sink: &mut dyn ActuatorSink) {
        for channel in &self.channels {
            *channel.lock_duty() = channel.neutral;
            if let Err(e) = sink.set_duty(channel.id, channel.neutral).await {
                warn!("Failed to neutralize channel {}: {}", channel.id, e);
            }
        }
        info!("All channels at neutral");
    }

    /// Final neutral pass, then release the sink.
    ///
    /// The bank accepts no further commands the sink would act on.
    pub async fn shutdown(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.begin_shutdown().await;
        self.neutral_all(&mut **sink).await;
        sink.release().await
    }

    /// Current duty of a channel.
    pub fn duty(&self, id: ChannelId) -> Result<f32> {
        Ok(self.channel(id)?.duty())
    }

    /// Channel ids on one bank, in configured order.
    pub fn side_ids(&self, side: Side) -> Vec<ChannelId> {
        self.channels.iter().filter(|c| c.side == side).map(|c| c.id).collect()
    }
}
