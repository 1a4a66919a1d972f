//! # Command Link Module
//!
//! Request/acknowledge serial link to the motor microcontroller.
//!
//! This module handles:
//! - Opening the serial port, retrying until the board is plugged in
//! - Sending one duty frame at a time and waiting for its acknowledgement line
//! - Reconnecting after write failures, read failures and ack timeouts
//! - Neutralizing and rebooting the board through the DTR line
//!
//! ## Link States
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!       ^                           |
//!       +---- write/read failure ---+
//! ```
//!
//! A frame that fails is dropped, not retried: the operator's next stick event
//! carries the current target anyway.

pub mod frame;
pub mod port_trait;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::channels::sink::ActuatorSink;
use crate::channels::ChannelId;
use crate::config::SerialConfig;
use crate::error::{Result, RoverBridgeError};
use crate::retry::Backoff;
use frame::LinkFrame;
use port_trait::{PortOpener, SerialPortIO};

/// Connection state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Delays used by the link
#[derive(Debug, Clone)]
pub struct LinkTiming {
    /// Wait after opening the port while the board boots
    pub settle_delay: Duration,
    /// Longest wait for an acknowledgement line
    pub ack_timeout: Duration,
    /// First reconnect delay
    pub reconnect_interval: Duration,
    /// Reconnect delay cap
    pub reconnect_max_interval: Duration,
    /// Pause between neutral frames and the DTR pulse
    pub neutral_pause: Duration,
    /// DTR low time
    pub reset_pulse: Duration,
    /// Wait after DTR goes high again
    pub reset_settle: Duration,
}

impl From<&SerialConfig> for LinkTiming {
    fn from(config: &SerialConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            ack_timeout: config.ack_timeout(),
            reconnect_interval: config.reconnect_interval(),
            reconnect_max_interval: config.reconnect_max_interval(),
            neutral_pause: Duration::from_millis(config.neutral_pause_ms),
            reset_pulse: Duration::from_millis(config.reset_pulse_ms),
            reset_settle: Duration::from_millis(config.reset_settle_ms),
        }
    }
}

/// Serial link to the motor microcontroller
///
/// `send` takes `&mut self`, so a link never has more than one frame awaiting
/// its acknowledgement.
pub struct CommandLink {
    opener: Box<dyn PortOpener>,
    port: Option<Box<dyn SerialPortIO>>,
    state: LinkState,
    timing: LinkTiming,
    /// Neutral duty for every channel the board drives, in reset order
    neutral: Vec<(ChannelId, f32)>,
    /// Set while a frame is on the wire; still set if that send was cancelled
    awaiting_ack: bool,
    /// Cleared at shutdown so failures stop triggering reconnects
    reconnect: bool,
    frames_acked: u64,
    drops: u64,
}

impl std::fmt::Debug for CommandLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandLink")
            .field("state", &self.state)
            .field("frames_acked", &self.frames_acked)
            .finish_non_exhaustive()
    }
}

impl CommandLink {
    /// Creates a disconnected link. Nothing is opened until [`connect`](Self::connect)
    /// or the first [`send`](Self::send).
    pub fn new(
        opener: Box<dyn PortOpener>,
        timing: LinkTiming,
        neutral: Vec<(ChannelId, f32)>,
    ) -> Self {
        Self {
            opener,
            port: None,
            state: LinkState::Disconnected,
            timing,
            neutral,
            awaiting_ack: false,
            reconnect: true,
            frames_acked: 0,
            drops: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Number of frames the board has acknowledged
    pub fn frames_acked(&self) -> u64 {
        self.frames_acked
    }

    /// Open the transport, retrying forever.
    ///
    /// Returns only once the port is open and the settle delay has passed.
    pub async fn connect(&mut self) {
        self.port = None;
        let mut backoff = Backoff::new(
            self.timing.reconnect_interval,
            self.timing.reconnect_max_interval,
        );

        loop {
            self.state = LinkState::Connecting;
            match self.opener.open().await {
                Ok(mut port) => {
                    debug!("Waiting {:?} for the motor controller to boot", self.timing.settle_delay);
                    sleep(self.timing.settle_delay).await;
                    // Boot output is not an ack.
                    if let Err(e) = port.discard_input() {
                        debug!("Could not discard boot output: {}", e);
                    }
                    self.port = Some(port);
                    self.awaiting_ack = false;
                    self.state = LinkState::Connected;
                    info!("Motor controller connection established");
                    return;
                }
                Err(e) => {
                    self.state = LinkState::Disconnected;
                    let delay = backoff.next_delay();
                    warn!(
                        "Motor controller not connected ({}), retrying in {:?} (attempt {})",
                        e,
                        delay,
                        backoff.attempts()
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Number of times a failed frame brought the link down
    pub fn drops(&self) -> u64 {
        self.drops
    }

    /// Stop reconnecting. Later sends on a dead link fail with `LinkUnavailable`.
    pub fn stop_reconnecting(&mut self) {
        self.reconnect = false;
    }

    /// Send a duty command and return the board's acknowledgement line.
    ///
    /// Connects first if the link is down. A failed frame is dropped and the
    /// link reconnects before this returns.
    ///
    /// # Errors
    ///
    /// - `Frame`: channel or duty does not fit the wire format (nothing is sent)
    /// - `LinkWriteFailure`: the write failed
    /// - `LinkReadStall`: no acknowledgement within the ack timeout
    /// - `LinkReadFailure`: the read failed or the port closed
    pub async fn send(&mut self, channel: ChannelId, duty: f32) -> Result<String> {
        let frame = LinkFrame::from_duty(channel, duty)?;
        let recover = self.reconnect;
        self.transmit(frame, recover).await
    }

    /// Like [`send`](Self::send) but never reconnects; fails with
    /// `LinkUnavailable` when the link is down.
    pub async fn send_once(&mut self, channel: ChannelId, duty: f32) -> Result<String> {
        let frame = LinkFrame::from_duty(channel, duty)?;
        self.transmit(frame, false).await
    }

    async fn transmit(&mut self, frame: LinkFrame, recover: bool) -> Result<String> {
        if self.state != LinkState::Connected || self.port.is_none() {
            if !recover {
                return Err(RoverBridgeError::LinkUnavailable("link is down".to_string()));
            }
            self.connect().await;
        }

        let port = self
            .port
            .as_mut()
            .ok_or_else(|| RoverBridgeError::LinkUnavailable("link is down".to_string()))?;

        if self.awaiting_ack {
            // The previous send was cancelled; its ack may still arrive.
            if let Err(e) = port.discard_input() {
                debug!("Could not discard stale input: {}", e);
            }
        }
        self.awaiting_ack = true;

        let payload = frame.encode();
        let written = match port.write_all(&payload).await {
            Ok(()) => port.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("Motor controller is no longer connected: {}", e);
            self.disconnect(recover).await;
            return Err(RoverBridgeError::LinkWriteFailure(e.to_string()));
        }
        debug!("Sent frame {}", frame);

        let failure = match timeout(self.timing.ack_timeout, read_ack(&mut **port)).await {
            Ok(Ok(Some(ack))) => {
                self.awaiting_ack = false;
                self.frames_acked += 1;
                debug!("Motor controller: {}", ack);
                return Ok(ack);
            }
            Ok(Ok(None)) => RoverBridgeError::LinkReadFailure("port closed".to_string()),
            Ok(Err(e)) => RoverBridgeError::LinkReadFailure(e.to_string()),
            Err(_) => RoverBridgeError::LinkReadStall(self.timing.ack_timeout),
        };

        warn!("Frame {} not acknowledged: {}", frame, failure);
        self.disconnect(recover).await;
        Err(failure)
    }

    async fn disconnect(&mut self, reconnect: bool) {
        self.drops += 1;
        self.port = None;
        self.state = LinkState::Disconnected;
        if reconnect {
            self.connect().await;
        }
    }

    /// Neutralize every motor, then reboot the board through DTR.
    ///
    /// Does not reconnect: on a dead link the sequence stops at the first
    /// failure so shutdown can't hang on a missing board.
    pub async fn reset(&mut self) -> Result<()> {
        let neutral = self.neutral.clone();
        for (channel, duty) in neutral {
            if let Err(e) = self.send_once(channel, duty).await {
                warn!("Could not neutralize channel {} before reset: {}", channel, e);
                return Err(e);
            }
        }
        info!("All motors should be off");
        sleep(self.timing.neutral_pause).await;

        let port = self
            .port
            .as_mut()
            .ok_or_else(|| RoverBridgeError::LinkUnavailable("link is down".to_string()))?;
        port.set_dtr(false)?;
        sleep(self.timing.reset_pulse).await;
        port.set_dtr(true)?;
        sleep(self.timing.reset_settle).await;
        if let Err(e) = port.discard_input() {
            debug!("Could not discard boot output: {}", e);
        }

        self.awaiting_ack = false;
        info!("Motor controller reset");
        Ok(())
    }

    /// Release the port.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Motor controller disconnected");
        }
        self.state = LinkState::Disconnected;
    }

    /// Reset the board if it is reachable, then close the port.
    pub async fn teardown(&mut self) {
        if self.state == LinkState::Connected {
            if let Err(e) = self.reset().await {
                warn!("Motor controller reset failed during teardown: {}", e);
            }
        }
        self.close();
    }
}

/// Read lines until a non-empty one arrives.
async fn read_ack(port: &mut dyn SerialPortIO) -> std::io::Result<Option<String>> {
    loop {
        match port.read_line().await? {
            None => return Ok(None),
            Some(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    return Ok(Some(line.to_string()));
                }
            }
        }
    }
}

/// Cloneable handle to a link shared by the channel bank and the session
#[derive(Debug, Clone)]
pub struct SharedLink {
    inner: Arc<Mutex<CommandLink>>,
}

impl SharedLink {
    pub fn new(link: CommandLink) -> Self {
        Self {
            inner: Arc::new(Mutex::new(link)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, CommandLink> {
        self.inner.lock().await
    }
}

#[async_trait]
impl ActuatorSink for SharedLink {
    async fn set_duty(&mut self, channel: ChannelId, duty: f32) -> Result<()> {
        self.inner.lock().await.send(channel, duty).await.map(|_| ())
    }

    async fn begin_shutdown(&mut self) {
        self.inner.lock().await.stop_reconnecting();
    }

    async fn release(&mut self) -> Result<()> {
        self.inner.lock().await.teardown().await;
        Ok(())
    }
}
