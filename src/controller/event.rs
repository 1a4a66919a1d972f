//! # Input Events
//!
//! Device-independent input events and their translation from evdev.
//!
//! ## Axis Numbering
//!
//! | Id | evdev axis | Stick       |
//! |----|------------|-------------|
//! | 0  | ABS_X      | Left X      |
//! | 1  | ABS_Y      | Left Y      |
//! | 2  | ABS_RX     | Right X     |
//! | 3  | ABS_RY     | Right Y     |
//! | 4  | ABS_Z      | Left trigger|
//! | 5  | ABS_RZ     | Right trigger|
//!
//! ## Button Numbering
//!
//! Buttons are numbered by key code offset from `BTN_SOUTH`:
//!
//! | Id | evdev key  | Xbox label |
//! |----|------------|------------|
//! | 0  | BTN_SOUTH  | A          |
//! | 1  | BTN_EAST   | B          |
//! | 3  | BTN_NORTH  | X          |
//! | 4  | BTN_WEST   | Y          |
//! | 6  | BTN_TL     | LB         |
//! | 7  | BTN_TR     | RB         |
//! | 11 | BTN_START  | Menu       |

use evdev::{AbsoluteAxisType, InputEventKind, Key};
use std::collections::HashMap;

/// One input event from the operator's device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Stick or trigger moved; `value` is normalized to `[-1, 1]`
    Axis { axis: u8, value: f32 },
    /// Button pressed
    ButtonDown { button: u8 },
    DeviceAdded,
    DeviceRemoved,
}

/// Axes reported as input events, in id order.
pub const AXES: [AbsoluteAxisType; 6] = [
    AbsoluteAxisType::ABS_X,
    AbsoluteAxisType::ABS_Y,
    AbsoluteAxisType::ABS_RX,
    AbsoluteAxisType::ABS_RY,
    AbsoluteAxisType::ABS_Z,
    AbsoluteAxisType::ABS_RZ,
];

/// Highest button id reported (`BTN_THUMBR`).
pub const MAX_BUTTON_ID: u8 = 14;

/// Axis id for an evdev axis.
pub fn axis_id(axis: AbsoluteAxisType) -> Option<u8> {
    AXES.iter().position(|a| *a == axis).map(|i| i as u8)
}

/// Button id for an evdev key.
pub fn button_id(key: Key) -> Option<u8> {
    let offset = key.code().checked_sub(Key::BTN_SOUTH.code())?;
    u8::try_from(offset).ok().filter(|id| *id <= MAX_BUTTON_ID)
}

/// Raw range an absolute axis reports in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
}

impl Default for AxisRange {
    /// 8-bit range of most gamepad sticks.
    fn default() -> Self {
        Self { min: 0, max: 255 }
    }
}

impl AxisRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Maps a raw value into `[-1, 1]`, clamping values outside the range.
    ///
    /// A degenerate range (max <= min) reads as centered.
    ///
    /// # Examples
    ///
    /// ```
    /// use rover_bridge::controller::event::AxisRange;
    ///
    /// let range = AxisRange::new(-32768, 32767);
    /// assert_eq!(range.normalize(-32768), -1.0);
    /// assert_eq!(range.normalize(32767), 1.0);
    /// ```
    pub fn normalize(&self, raw: i32) -> f32 {
        if self.max <= self.min {
            return 0.0;
        }
        let span = f64::from(self.max) - f64::from(self.min);
        let scaled = 2.0 * (f64::from(raw) - f64::from(self.min)) / span - 1.0;
        scaled.clamp(-1.0, 1.0) as f32
    }
}

/// Translates raw evdev events using the device's axis ranges
#[derive(Debug, Clone, Default)]
pub struct EventTranslator {
    ranges: HashMap<u16, AxisRange>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the raw range reported for `axis`.
    pub fn set_range(&mut self, axis: AbsoluteAxisType, range: AxisRange) {
        self.ranges.insert(axis.0, range);
    }

    pub fn range(&self, axis: AbsoluteAxisType) -> AxisRange {
        self.ranges.get(&axis.0).copied().unwrap_or_default()
    }

    /// Returns `None` for events the router has no use for (sync reports,
    /// releases, auto-repeat, unknown axes and keys).
    pub fn translate(&self, event: &evdev::InputEvent) -> Option<InputEvent> {
        match event.kind() {
            InputEventKind::AbsAxis(axis) => axis_id(axis).map(|id| InputEvent::Axis {
                axis: id,
                value: self.range(axis).normalize(event.value()),
            }),
            // 1 is a press; 0 release and 2 auto-repeat are ignored
            InputEventKind::Key(key) if event.value() == 1 => {
                button_id(key).map(|id| InputEvent::ButtonDown { button: id })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::EventType;

    /// Helper to create an axis event for testing.
    fn make_axis_event(axis: AbsoluteAxisType, value: i32) -> evdev::InputEvent {
        evdev::InputEvent::new(EventType::ABSOLUTE, axis.0, value)
    }

    /// Helper to create a key event for testing.
    fn make_key_event(key: Key, value: i32) -> evdev::InputEvent {
        evdev::InputEvent::new(EventType::KEY, key.code(), value)
    }

    #[test]
    fn test_axis_numbering() {
        assert_eq!(axis_id(AbsoluteAxisType::ABS_X), Some(0));
        assert_eq!(axis_id(AbsoluteAxisType::ABS_Y), Some(1));
        assert_eq!(axis_id(AbsoluteAxisType::ABS_RX), Some(2));
        assert_eq!(axis_id(AbsoluteAxisType::ABS_RY), Some(3));
        assert_eq!(axis_id(AbsoluteAxisType::ABS_Z), Some(4));
        assert_eq!(axis_id(AbsoluteAxisType::ABS_RZ), Some(5));
        assert_eq!(axis_id(AbsoluteAxisType::ABS_HAT0X), None);
    }

    #[test]
    fn test_button_numbering() {
        assert_eq!(button_id(Key::BTN_SOUTH), Some(0));
        assert_eq!(button_id(Key::BTN_EAST), Some(1));
        assert_eq!(button_id(Key::BTN_NORTH), Some(3));
        assert_eq!(button_id(Key::BTN_WEST), Some(4));
        assert_eq!(button_id(Key::BTN_TL), Some(6));
        assert_eq!(button_id(Key::BTN_TR), Some(7));
        assert_eq!(button_id(Key::BTN_START), Some(11));
        assert_eq!(button_id(Key::BTN_THUMBR), Some(14));
    }

    #[test]
    fn test_non_gamepad_keys_have_no_id() {
        assert_eq!(button_id(Key::KEY_A), None);
        assert_eq!(button_id(Key::BTN_TRIGGER_HAPPY1), None);
    }

    #[test]
    fn test_normalize_8_bit_range() {
        let range = AxisRange::default();
        assert_eq!(range.normalize(0), -1.0);
        assert_eq!(range.normalize(255), 1.0);
        assert!(range.normalize(128).abs() < 0.01);
    }

    #[test]
    fn test_normalize_clamps_and_handles_degenerate_range() {
        let range = AxisRange::new(0, 1023);
        assert_eq!(range.normalize(-50), -1.0);
        assert_eq!(range.normalize(5000), 1.0);
        assert_eq!(AxisRange::new(10, 10).normalize(10), 0.0);
    }

    #[test]
    fn test_translate_axis_uses_device_range() {
        let mut translator = EventTranslator::new();
        translator.set_range(AbsoluteAxisType::ABS_RY, AxisRange::new(-32768, 32767));

        let event = translator.translate(&make_axis_event(AbsoluteAxisType::ABS_RY, 32767));
        assert_eq!(event, Some(InputEvent::Axis { axis: 3, value: 1.0 }));

        // Unconfigured axes fall back to 0-255.
        let event = translator.translate(&make_axis_event(AbsoluteAxisType::ABS_Y, 0));
        assert_eq!(event, Some(InputEvent::Axis { axis: 1, value: -1.0 }));
    }

    #[test]
    fn test_translate_reports_presses_only() {
        let translator = EventTranslator::new();
        assert_eq!(
            translator.translate(&make_key_event(Key::BTN_TL, 1)),
            Some(InputEvent::ButtonDown { button: 6 })
        );
        assert_eq!(translator.translate(&make_key_event(Key::BTN_TL, 0)), None);
        assert_eq!(translator.translate(&make_key_event(Key::BTN_TL, 2)), None);
    }

    #[test]
    fn test_translate_ignores_sync_and_unknown_axes() {
        let translator = EventTranslator::new();
        let sync = evdev::InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        assert_eq!(translator.translate(&sync), None);
        assert_eq!(
            translator.translate(&make_axis_event(AbsoluteAxisType::ABS_HAT0Y, 1)),
            None
        );
    }
}
