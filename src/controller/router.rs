//! # Input Router
//!
//! Turns gamepad events into channel commands and session actions.
//!
//! ## Drive Modes
//!
//! - **Duo** (tank drive): left stick Y drives the left bank, right stick Y
//!   drives the right bank. Two operators can share one pad.
//! - **Solo**: the left stick alone steers. Its X/Y position is mixed into a
//!   left/right pair (see [`solo_mix`]). With `solo_mapping = "reversed"` solo
//!   is tank drive facing the rear instead: the sticks swap banks and the
//!   right stick's inversion moves to the left bank.
//!
//! ## Buttons
//!
//! | Button | Action |
//! |--------|--------|
//! | 11 (Menu) | Shutdown |
//! | 3 (X) | Emergency stop |
//! | 6 (LB) | Solo mode |
//! | 7 (RB) | Duo mode |
//! | 4 (Y) | Toggle mode |
//! | 1 (B) | Reset the link |

use serde::Serialize;
use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::duty::DutyCycleMapper;
use super::event::InputEvent;
use crate::channels::{ChannelBank, ChannelId, Side};
use crate::config::{ControllerConfig, DriveConfig, SoloMapping};
use crate::error::Result;
use crate::indicator::{Status, StatusIndicator};

/// How stick input reaches the motor banks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Duo,
    Solo,
}

impl InputMode {
    pub fn toggled(self) -> Self {
        match self {
            InputMode::Duo => InputMode::Solo,
            InputMode::Solo => InputMode::Duo,
        }
    }
}

/// Fixed meaning of each gamepad button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Shutdown,
    EmergencyStop,
    SelectMode(InputMode),
    ToggleMode,
    ResetLink,
    Noop,
}

impl ButtonAction {
    pub fn for_button(button: u8) -> Self {
        match button {
            11 => ButtonAction::Shutdown,
            3 => ButtonAction::EmergencyStop,
            6 => ButtonAction::SelectMode(InputMode::Solo),
            7 => ButtonAction::SelectMode(InputMode::Duo),
            4 => ButtonAction::ToggleMode,
            1 => ButtonAction::ResetLink,
            _ => ButtonAction::Noop,
        }
    }
}

/// What the session should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterAction {
    Continue,
    ModeChanged(InputMode),
    Shutdown,
    EmergencyStop,
    ResetLink,
    DeviceLost,
}

/// Axis ids the router listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisMap {
    pub left_x: u8,
    pub left_y: u8,
    pub right_y: u8,
}

impl Default for AxisMap {
    fn default() -> Self {
        Self {
            left_x: 0,
            left_y: 1,
            right_y: 3,
        }
    }
}

impl From<&ControllerConfig> for AxisMap {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            left_x: config.left_x_axis,
            left_y: config.left_y_axis,
            right_y: config.right_y_axis,
        }
    }
}

/// Last reported stick positions
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Sticks {
    left_x: f32,
    left_y: f32,
    right_y: f32,
}

/// Mixes one stick's position into `(left, right)` bank signals.
///
/// The vector is rotated by 45 degrees, then each side is scaled by the stick
/// component pushing toward it.
///
/// ```
/// use rover_bridge::controller::router::solo_mix;
///
/// assert_eq!(solo_mix(0.0, 0.0), (0.0, 0.0));
/// ```
pub fn solo_mix(x: f32, y: f32) -> (f32, f32) {
    let r = x.hypot(y);
    let theta = y.atan2(x);
    let mut left = r * (theta + FRAC_PI_4).sin();
    let mut right = r * (theta + FRAC_PI_4).cos();

    if x < 0.0 {
        left *= x.abs();
    } else {
        right *= x.abs();
    }
    if y < 0.0 {
        left *= y.abs();
    } else {
        right *= y.abs();
    }
    (left, right)
}

/// Routes gamepad events to the channel bank
pub struct InputRouter {
    mode: InputMode,
    left: DutyCycleMapper,
    right: DutyCycleMapper,
    axes: AxisMap,
    solo: SoloMapping,
    sticks: Sticks,
    left_ids: Vec<ChannelId>,
    right_ids: Vec<ChannelId>,
    indicator: Arc<dyn StatusIndicator>,
}

impl std::fmt::Debug for InputRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputRouter")
            .field("mode", &self.mode)
            .field("axes", &self.axes)
            .field("solo", &self.solo)
            .field("left_ids", &self.left_ids)
            .field("right_ids", &self.right_ids)
            .finish_non_exhaustive()
    }
}

impl InputRouter {
    pub fn new(
        left: DutyCycleMapper,
        right: DutyCycleMapper,
        axes: AxisMap,
        left_ids: Vec<ChannelId>,
        right_ids: Vec<ChannelId>,
        indicator: Arc<dyn StatusIndicator>,
    ) -> Self {
        Self {
            mode: InputMode::Duo,
            left,
            right,
            axes,
            solo: SoloMapping::Mix,
            sticks: Sticks::default(),
            left_ids,
            right_ids,
            indicator,
        }
    }

    /// Router driving the bank's left and right channels.
    pub fn from_config(
        controller: &ControllerConfig,
        drive: &DriveConfig,
        bank: &ChannelBank,
        indicator: Arc<dyn StatusIndicator>,
    ) -> Self {
        Self::new(
            DutyCycleMapper::for_side(drive, Side::Left),
            DutyCycleMapper::for_side(drive, Side::Right),
            AxisMap::from(controller),
            bank.side_ids(Side::Left),
            bank.side_ids(Side::Right),
            indicator,
        )
        .with_solo_mapping(controller.solo_mapping)
    }

    pub fn with_solo_mapping(mut self, solo: SoloMapping) -> Self {
        self.solo = solo;
        self
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Switch mode. Returns `false` if already in `mode`.
    pub fn set_mode(&mut self, mode: InputMode) -> bool {
        if mode == self.mode {
            return false;
        }
        self.mode = mode;
        info!("Input mode set to {:?}", mode);
        if let Err(e) = self.indicator.show(Status::Running(mode)) {
            warn!("Status LED update failed: {}", e);
        }
        true
    }

    /// Back to duo mode with centered sticks, as after a fresh connect.
    pub fn reset(&mut self) {
        self.mode = InputMode::Duo;
        self.sticks = Sticks::default();
    }

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Only unrecoverable sink errors are returned. Unknown channels and link
    /// failures are logged and the command is dropped.
    pub async fn on_event(&mut self, event: InputEvent, bank: &ChannelBank) -> Result<RouterAction> {
        match event {
            InputEvent::Axis { axis, value } => {
                self.on_axis(axis, value, bank).await?;
                Ok(RouterAction::Continue)
            }
            InputEvent::ButtonDown { button } => Ok(self.on_button(button)),
            InputEvent::DeviceAdded => Ok(RouterAction::Continue),
            InputEvent::DeviceRemoved => Ok(RouterAction::DeviceLost),
        }
    }

    async fn on_axis(&mut self, axis: u8, value: f32, bank: &ChannelBank) -> Result<()> {
        if axis == self.axes.left_x {
            self.sticks.left_x = value;
        }
        if axis == self.axes.left_y {
            self.sticks.left_y = value;
        }
        if axis == self.axes.right_y {
            self.sticks.right_y = value;
        }

        match self.mode {
            InputMode::Duo => {
                if axis == self.axes.left_y {
                    let duty = self.left.map(value);
                    drive(bank, &self.left_ids, duty).await?;
                } else if axis == self.axes.right_y {
                    let duty = self.right.map(-value);
                    drive(bank, &self.right_ids, duty).await?;
                }
            }
            InputMode::Solo => match self.solo {
                SoloMapping::Mix => {
                    if axis == self.axes.left_x || axis == self.axes.left_y {
                        let (left, right) = solo_mix(self.sticks.left_x, self.sticks.left_y);
                        drive(bank, &self.left_ids, self.left.map(left)).await?;
                        drive(bank, &self.right_ids, self.right.map(right)).await?;
                    }
                }
                SoloMapping::Reversed => {
                    if axis == self.axes.left_y {
                        let duty = self.right.map(value);
                        drive(bank, &self.right_ids, duty).await?;
                    } else if axis == self.axes.right_y {
                        let duty = self.left.map(-value);
                        drive(bank, &self.left_ids, duty).await?;
                    }
                }
            },
        }
        Ok(())
    }

    fn on_button(&mut self, button: u8) -> RouterAction {
        let action = ButtonAction::for_button(button);
        debug!("Button {} -> {:?}", button, action);

        match action {
            ButtonAction::Shutdown => RouterAction::Shutdown,
            ButtonAction::EmergencyStop => RouterAction::EmergencyStop,
            ButtonAction::ResetLink => RouterAction::ResetLink,
            ButtonAction::SelectMode(mode) => self.mode_action(mode),
            ButtonAction::ToggleMode => self.mode_action(self.mode.toggled()),
            ButtonAction::Noop => RouterAction::Continue,
        }
    }

    fn mode_action(&mut self, mode: InputMode) -> RouterAction {
        if self.set_mode(mode) {
            RouterAction::ModeChanged(mode)
        } else {
            RouterAction::Continue
        }
    }
}

/// Apply one rounded target to every channel of a bank side.
async fn drive(bank: &ChannelBank, ids: &[ChannelId], duty: f32) -> Result<()> {
    let target = duty.round();
    for &id in ids {
        match bank.apply(id, target).await {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                warn!("Dropped command for channel {}: {}", id, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
