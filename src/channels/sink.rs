//! Actuator sink abstraction
//!
//! A sink receives the final duty for each channel. The rover either forwards
//! duties to the motor microcontroller ([`SharedLink`](crate::link::SharedLink))
//! or drives the motor controllers straight from the Pi's GPIO ([`PwmSink`]).

use async_trait::async_trait;
use rppal::gpio::{Gpio, OutputPin};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::ChannelId;
use crate::error::{Result, RoverBridgeError};

/// Destination for final duty values
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActuatorSink: Send {
    /// Drive one channel at `duty` percent.
    async fn set_duty(&mut self, channel: ChannelId, duty: f32) -> Result<()>;

    /// Called once before the final neutral commands at shutdown.
    async fn begin_shutdown(&mut self) {}

    /// Release the hardware. No further duties follow.
    async fn release(&mut self) -> Result<()>;
}

/// Local software PWM on Raspberry Pi GPIO pins
pub struct PwmSink {
    pins: HashMap<ChannelId, OutputPin>,
    frequency_hz: f64,
}

impl std::fmt::Debug for PwmSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<_> = self.pins.keys().copied().collect();
        channels.sort_unstable();
        f.debug_struct("PwmSink")
            .field("channels", &channels)
            .field("frequency_hz", &self.frequency_hz)
            .finish()
    }
}

impl PwmSink {
    /// Claims one output pin per channel and starts each at `initial` duty.
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if the GPIO peripheral or a pin cannot be claimed.
    pub fn new(
        channels: &[(ChannelId, u8, f32)],
        frequency_hz: f64,
    ) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::with_capacity(channels.len());

        for &(channel, pin_number, initial) in channels {
            let mut pin = gpio.get(pin_number)?.into_output();
            pin.set_pwm_frequency(frequency_hz, fraction(initial))?;
            debug!("GPIO {} claimed for channel {}", pin_number, channel);
            pins.insert(channel, pin);
        }

        info!("Local PWM on {} channels at {} Hz", pins.len(), frequency_hz);
        Ok(Self { pins, frequency_hz })
    }
}

/// Duty percentage to the 0.0-1.0 fraction rppal expects.
fn fraction(duty: f32) -> f64 {
    (f64::from(duty) / 100.0).clamp(0.0, 1.0)
}

#[async_trait]
impl ActuatorSink for PwmSink {
    async fn set_duty(&mut self, channel: ChannelId, duty: f32) -> Result<()> {
        let pin = self
            .pins
            .get_mut(&channel)
            .ok_or(RoverBridgeError::ChannelOutOfRange(channel))?;
        pin.set_pwm_frequency(self.frequency_hz, fraction(duty))?;
        debug!("Channel {} duty {}", channel, duty);
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        for (channel, pin) in self.pins.iter_mut() {
            if let Err(e) = pin.clear_pwm() {
                warn!("Failed to stop PWM on channel {}: {}", channel, e);
            }
            pin.set_low();
        }
        info!("GPIO released");
        Ok(())
    }
}
