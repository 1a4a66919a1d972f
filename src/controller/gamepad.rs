//! # Gamepad Module
//!
//! Finds the operator's gamepad and streams its events through the Linux
//! evdev interface.
//!
//! ## Device Detection
//!
//! Any `/dev/input/event*` device reporting both left stick axes (`ABS_X`,
//! `ABS_Y`) and the south face button (`BTN_SOUTH`) counts as a gamepad. Xbox,
//! DualSense and most generic pads qualify; keyboards and mice do not.

use async_trait::async_trait;
use evdev::{AbsoluteAxisType, Device, Key};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::event::{AxisRange, EventTranslator, InputEvent, AXES};
use crate::error::{Result, RoverBridgeError};

/// Stream of events from one opened device
#[async_trait]
pub trait InputSource: Send {
    /// Wait for the next event.
    ///
    /// Yields `DeviceRemoved` once the device goes away; the source is dead
    /// after that.
    async fn next_event(&mut self) -> InputEvent;

    /// Human-readable device name
    fn name(&self) -> &str;
}

/// Opens an input source
#[async_trait]
pub trait DeviceFinder: Send + Sync {
    /// # Errors
    ///
    /// Returns `InputUnavailable` when no usable device is present.
    async fn find(&self) -> Result<Box<dyn InputSource>>;
}

/// Returns `true` if the device has gamepad sticks and face buttons.
fn is_gamepad(device: &Device) -> bool {
    let has_sticks = device.supported_absolute_axes().map_or(false, |axes| {
        axes.contains(AbsoluteAxisType::ABS_X) && axes.contains(AbsoluteAxisType::ABS_Y)
    });
    let has_buttons = device
        .supported_keys()
        .map_or(false, |keys| keys.contains(Key::BTN_SOUTH));
    has_sticks && has_buttons
}

/// Opened evdev gamepad
pub struct Gamepad {
    stream: evdev::EventStream,
    translator: EventTranslator,
    name: String,
    device_path: String,
    announced: bool,
    lost: bool,
}

impl Gamepad {
    /// Open the gamepad at `path`.
    ///
    /// # Errors
    ///
    /// - `InputUnavailable`: the device can't be opened or is not a gamepad
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rover_bridge::controller::gamepad::Gamepad;
    ///
    /// let pad = Gamepad::open("/dev/input/event4")?;
    /// println!("Connected to {}", pad.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let device = Device::open(path).map_err(|e| {
            RoverBridgeError::InputUnavailable(format!("{}: {}", path.display(), e))
        })?;
        if !is_gamepad(&device) {
            return Err(RoverBridgeError::InputUnavailable(format!(
                "{} is not a gamepad",
                path.display()
            )));
        }
        Self::from_device(device, path)
    }

    fn from_device(device: Device, path: &Path) -> Result<Self> {
        let mut translator = EventTranslator::new();
        match device.get_abs_state() {
            Ok(state) => {
                for axis in AXES {
                    if let Some(info) = state.get(usize::from(axis.0)) {
                        translator.set_range(axis, AxisRange::new(info.minimum, info.maximum));
                    }
                }
            }
            Err(e) => debug!("No axis ranges for {}: {}, assuming 0-255", path.display(), e),
        }

        let name = device.name().unwrap_or("Unknown gamepad").to_string();
        let stream = device.into_event_stream().map_err(|e| {
            RoverBridgeError::InputUnavailable(format!("{}: {}", path.display(), e))
        })?;

        Ok(Self {
            stream,
            translator,
            name,
            device_path: path.to_string_lossy().to_string(),
            announced: false,
            lost: false,
        })
    }

    /// The `/dev/input/eventX` path this gamepad was opened from.
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl InputSource for Gamepad {
    async fn next_event(&mut self) -> InputEvent {
        if !self.announced {
            self.announced = true;
            return InputEvent::DeviceAdded;
        }
        if self.lost {
            return InputEvent::DeviceRemoved;
        }

        loop {
            match self.stream.next_event().await {
                Ok(raw) => {
                    if let Some(event) = self.translator.translate(&raw) {
                        return event;
                    }
                }
                Err(e) => {
                    warn!("Lost gamepad {}: {}", self.device_path, e);
                    self.lost = true;
                    return InputEvent::DeviceRemoved;
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Finds a gamepad on the system, or opens a configured device path
#[derive(Debug, Clone, Default)]
pub struct EvdevFinder {
    device_path: Option<PathBuf>,
}

impl EvdevFinder {
    /// `device_path` empty means scan `/dev/input`.
    pub fn new(device_path: &str) -> Self {
        Self {
            device_path: (!device_path.is_empty()).then(|| PathBuf::from(device_path)),
        }
    }

    fn scan() -> Result<Gamepad> {
        // Sorted for deterministic selection when several pads are connected
        let mut devices: Vec<(PathBuf, Device)> = evdev::enumerate().collect();
        devices.sort_by(|a, b| a.0.cmp(&b.0));

        for (path, device) in devices {
            debug!(
                "Found input device: {} ({})",
                path.display(),
                device.name().unwrap_or("unnamed")
            );
            if is_gamepad(&device) {
                return Gamepad::from_device(device, &path);
            }
        }

        Err(RoverBridgeError::InputUnavailable(
            "no gamepad found in /dev/input".to_string(),
        ))
    }
}

#[async_trait]
impl DeviceFinder for EvdevFinder {
    async fn find(&self) -> Result<Box<dyn InputSource>> {
        let pad = match &self.device_path {
            Some(path) => Gamepad::open(path)?,
            None => Self::scan()?,
        };
        info!("Gamepad connected: {} at {}", pad.name(), pad.device_path());
        Ok(Box::new(pad))
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays a fixed list of events, then waits forever
    pub struct ScriptedSource {
        events: VecDeque<InputEvent>,
    }

    impl ScriptedSource {
        pub fn new(events: Vec<InputEvent>) -> Self {
            Self {
                events: events.into(),
            }
        }
    }

    #[async_trait]
    impl InputSource for ScriptedSource {
        async fn next_event(&mut self) -> InputEvent {
            match self.events.pop_front() {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }

        fn name(&self) -> &str {
            "Scripted gamepad"
        }
    }

    /// Hands out one scripted source per successful `find`
    #[derive(Clone, Default)]
    pub struct ScriptedFinder {
        pub scripts: Arc<Mutex<VecDeque<Vec<InputEvent>>>>,
        pub failures_left: Arc<AtomicUsize>,
        pub finds: Arc<AtomicUsize>,
    }

    impl ScriptedFinder {
        pub fn new(scripts: Vec<Vec<InputEvent>>) -> Self {
            Self {
                scripts: Arc::new(Mutex::new(scripts.into())),
                ..Self::default()
            }
        }

        pub fn failing_first(self, failures: usize) -> Self {
            self.failures_left.store(failures, Ordering::SeqCst);
            self
        }

        pub fn finds(&self) -> usize {
            self.finds.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeviceFinder for ScriptedFinder {
        async fn find(&self) -> Result<Box<dyn InputSource>> {
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(RoverBridgeError::InputUnavailable("no mock pad".to_string()));
            }
            let script = self.scripts.lock().unwrap().pop_front().ok_or_else(|| {
                RoverBridgeError::InputUnavailable("no scripts left".to_string())
            })?;
            self.finds.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSource::new(script)))
        }
    }
}
