//! # Control Session
//!
//! Top-level control loop: acquires the gamepad and the motor link, routes
//! events until something asks to stop, then leaves every motor at neutral.
//!
//! ## Session States
//!
//! ```text
//! Idle -> AcquiringDevice -> AcquiringLink -> Running -> ShuttingDown -> Terminated
//!              ^                                 |
//!              +---------- gamepad lost ---------+
//! ```
//!
//! Every wait (gamepad, link, next event, in-flight command) is raced against
//! the [`ShutdownSignal`], so Ctrl+C never has to wait for a missing device.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::channels::sink::{ActuatorSink, PwmSink};
use crate::channels::{ChannelBank, ChannelId};
use crate::config::{Config, SinkKind};
use crate::controller::gamepad::{DeviceFinder, EvdevFinder, InputSource};
use crate::controller::router::{InputRouter, RouterAction};
use crate::error::Result;
use crate::indicator::{NullIndicator, RgbIndicator, Status, StatusIndicator};
use crate::journal::{Journal, SessionEvent};
use crate::link::port_trait::SerialOpener;
use crate::link::{CommandLink, LinkState, LinkTiming, SharedLink};
use crate::retry::Backoff;

/// Lifecycle of a control session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AcquiringDevice,
    AcquiringLink,
    Running,
    ShuttingDown,
    Terminated,
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT, SIGTERM or a programmatic trigger
    Signal,
    /// Menu button
    ShutdownButton,
    /// X button
    EmergencyStop,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal => write!(f, "signal"),
            ShutdownReason::ShutdownButton => write!(f, "shutdown button"),
            ShutdownReason::EmergencyStop => write!(f, "emergency stop"),
        }
    }
}

#[derive(Debug, Default)]
struct SignalInner {
    triggered: AtomicBool,
    notify: Notify,
}

/// Cloneable one-way shutdown trigger
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        loop {
            // Registered before the flag check so a concurrent trigger isn't missed
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Trigger on the first SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the signal handlers can't be installed.
    pub fn listen_for_os_signals(&self) -> Result<JoinHandle<()>> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let trigger = self.clone();

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => info!("Received SIGINT, shutting down..."),
                _ = terminate.recv() => info!("Received SIGTERM, shutting down..."),
            }
            trigger.trigger();
        }))
    }
}

/// Runs the shutdown sequence exactly once
///
/// Concurrent callers all wait for the one sequence to finish.
pub struct Finalizer {
    bank: Arc<ChannelBank>,
    indicator: Arc<dyn StatusIndicator>,
    done: OnceCell<()>,
}

impl Finalizer {
    pub fn new(bank: Arc<ChannelBank>, indicator: Arc<dyn StatusIndicator>) -> Self {
        Self {
            bank,
            indicator,
            done: OnceCell::new(),
        }
    }

    /// Neutralize every channel, then tear down the sink.
    pub async fn finalize(&self) {
        self.done
            .get_or_init(|| async {
                if let Err(e) = self.bank.shutdown().await {
                    error!("Actuator release failed: {}", e);
                }
                if let Err(e) = self.indicator.show(Status::Off) {
                    warn!("Status LED update failed: {}", e);
                }
                info!("Shutdown complete, motors at neutral");
            })
            .await;
    }

    pub fn is_done(&self) -> bool {
        self.done.initialized()
    }
}

/// Everything a session drives
pub struct SessionParts {
    pub finder: Box<dyn DeviceFinder>,
    pub bank: Arc<ChannelBank>,
    /// `None` when duties go to local PWM
    pub link: Option<SharedLink>,
    pub router: InputRouter,
    pub indicator: Arc<dyn StatusIndicator>,
    pub journal: Journal,
    pub device_retry: Duration,
}

/// Gamepad-to-motors control loop
pub struct ControlSession {
    finder: Box<dyn DeviceFinder>,
    bank: Arc<ChannelBank>,
    link: Option<SharedLink>,
    router: InputRouter,
    indicator: Arc<dyn StatusIndicator>,
    journal: Journal,
    device_retry: Duration,
    state: SessionState,
    shutdown: ShutdownSignal,
    finalizer: Arc<Finalizer>,
    seen_drops: u64,
}

impl ControlSession {
    pub fn new(parts: SessionParts) -> Self {
        let finalizer = Arc::new(Finalizer::new(parts.bank.clone(), parts.indicator.clone()));
        Self {
            finder: parts.finder,
            bank: parts.bank,
            link: parts.link,
            router: parts.router,
            indicator: parts.indicator,
            journal: parts.journal,
            device_retry: parts.device_retry,
            state: SessionState::Idle,
            shutdown: ShutdownSignal::new(),
            finalizer,
            seen_drops: 0,
        }
    }

    /// Wire up the real hardware described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `Gpio` if PWM pins or the status LED can't be claimed, and `Io`
    /// if the journal can't be opened.
    pub fn from_config(config: &Config) -> Result<Self> {
        let indicator: Arc<dyn StatusIndicator> = if config.indicator.enabled {
            Arc::new(RgbIndicator::new(&config.indicator)?)
        } else {
            Arc::new(NullIndicator)
        };

        let (sink, link): (Box<dyn ActuatorSink>, Option<SharedLink>) = match config.drive.sink {
            SinkKind::Serial => {
                let neutral = config
                    .channels
                    .iter()
                    .map(|spec| (spec.id, config.drive.neutral_for(spec.side)))
                    .collect();
                let opener = SerialOpener::new(config.serial.device_paths(), config.serial.baud_rate);
                let link = SharedLink::new(CommandLink::new(
                    Box::new(opener),
                    LinkTiming::from(&config.serial),
                    neutral,
                ));
                (Box::new(link.clone()), Some(link))
            }
            SinkKind::Pwm => {
                let pins: Vec<(ChannelId, u8, f32)> = config
                    .channels
                    .iter()
                    .filter_map(|spec| spec.pin.map(|pin| (spec.id, pin, config.drive.neutral_for(spec.side))))
                    .collect();
                (Box::new(PwmSink::new(&pins, config.drive.pwm_frequency_hz)?), None)
            }
        };

        let bank = Arc::new(ChannelBank::from_config(&config.channels, &config.drive, sink));
        let router = InputRouter::from_config(&config.controller, &config.drive, &bank, indicator.clone());
        let journal = if config.journal.enabled {
            Journal::open(&config.journal.path)?
        } else {
            Journal::disabled()
        };

        Ok(Self::new(SessionParts {
            finder: Box::new(EvdevFinder::new(&config.controller.device_path)),
            bank,
            link,
            router,
            indicator,
            journal,
            device_retry: Duration::from_millis(config.controller.retry_interval_ms),
        }))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle that stops this session when triggered.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn finalizer(&self) -> Arc<Finalizer> {
        self.finalizer.clone()
    }

    pub fn router(&self) -> &InputRouter {
        &self.router
    }

    /// Run until shutdown. Motors are at neutral when this returns, error or not.
    ///
    /// # Errors
    ///
    /// Returns the unrecoverable error that ended the session.
    pub async fn run(&mut self) -> Result<ShutdownReason> {
        let sink = if self.link.is_some() { "serial" } else { "pwm" };
        self.journal.record(SessionEvent::Started { sink: sink.to_string() });
        info!("Control session started ({} output)", sink);

        let outcome = self.drive().await;

        self.state = SessionState::ShuttingDown;
        let reason = match &outcome {
            Ok(reason) => reason.to_string(),
            Err(e) => {
                error!("Session failed: {}", e);
                format!("error: {}", e)
            }
        };
        info!("Shutting down ({})", reason);
        self.finalizer.finalize().await;
        self.journal.record(SessionEvent::Shutdown { reason });
        self.state = SessionState::Terminated;
        outcome
    }

    async fn drive(&mut self) -> Result<ShutdownReason> {
        let shutdown = self.shutdown.clone();

        loop {
            self.state = SessionState::AcquiringDevice;
            self.show(Status::Waiting);
            let mut source = tokio::select! {
                source = acquire_device(self.finder.as_ref(), self.device_retry) => source,
                _ = shutdown.wait() => return Ok(ShutdownReason::Signal),
            };
            self.journal.record(SessionEvent::DeviceConnected {
                name: source.name().to_string(),
            });

            if let Some(link) = self.link.clone() {
                self.state = SessionState::AcquiringLink;
                let connected = tokio::select! {
                    connected = ensure_connected(&link) => connected,
                    _ = shutdown.wait() => return Ok(ShutdownReason::Signal),
                };
                if connected {
                    self.journal.record(SessionEvent::LinkConnected);
                }
            }

            self.state = SessionState::Running;
            self.show(Status::Running(self.router.mode()));
            info!("Driving with {}", source.name());

            match self.route_events(source.as_mut(), &shutdown).await? {
                Some(reason) => return Ok(reason),
                None => continue,
            }
        }
    }

    /// Route events from one device. `None` means the device was lost.
    async fn route_events(
        &mut self,
        source: &mut dyn InputSource,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<ShutdownReason>> {
        loop {
            let event = tokio::select! {
                event = source.next_event() => event,
                _ = shutdown.wait() => return Ok(Some(ShutdownReason::Signal)),
            };
            let action = tokio::select! {
                action = self.router.on_event(event, &self.bank) => action?,
                _ = shutdown.wait() => return Ok(Some(ShutdownReason::Signal)),
            };
            self.note_link_drops().await;

            match action {
                RouterAction::Continue => {}
                RouterAction::ModeChanged(mode) => {
                    self.journal.record(SessionEvent::ModeChanged { mode });
                }
                RouterAction::Shutdown => return Ok(Some(ShutdownReason::ShutdownButton)),
                RouterAction::EmergencyStop => {
                    warn!("Emergency stop");
                    self.bank.force_neutral().await;
                    self.journal.record(SessionEvent::EmergencyStop);
                    return Ok(Some(ShutdownReason::EmergencyStop));
                }
                RouterAction::ResetLink => {
                    tokio::select! {
                        _ = self.reset_link() => {}
                        _ = shutdown.wait() => return Ok(Some(ShutdownReason::Signal)),
                    }
                }
                RouterAction::DeviceLost => {
                    warn!("Gamepad lost, motors to neutral");
                    self.bank.force_neutral().await;
                    self.router.reset();
                    self.journal.record(SessionEvent::DeviceLost);
                    return Ok(None);
                }
            }
        }
    }

    async fn reset_link(&mut self) {
        info!("Resetting motor controller");
        self.bank.force_neutral().await;
        if let Some(link) = &self.link {
            if let Err(e) = link.lock().await.reset().await {
                warn!("Motor controller reset failed: {}", e);
            }
        }
        self.journal.record(SessionEvent::LinkReset);
    }

    async fn note_link_drops(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        let drops = link.lock().await.drops();
        if drops > self.seen_drops {
            self.seen_drops = drops;
            self.journal.record(SessionEvent::LinkLost { drops });
        }
    }

    fn show(&self, status: Status) {
        if let Err(e) = self.indicator.show(status) {
            warn!("Status LED update failed: {}", e);
        }
    }
}

/// Retry the finder until a device opens.
async fn acquire_device(finder: &dyn DeviceFinder, retry: Duration) -> Box<dyn InputSource> {
    let mut backoff = Backoff::fixed(retry);
    loop {
        match finder.find().await {
            Ok(source) => return source,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    "Gamepad not connected ({}), retrying in {:?} (attempt {})",
                    e,
                    delay,
                    backoff.attempts()
                );
                sleep(delay).await;
            }
        }
    }
}

/// Connect the link unless it already is. Returns `true` if it had to connect.
async fn ensure_connected(link: &SharedLink) -> bool {
    let mut link = link.lock().await;
    if link.state() == LinkState::Connected {
        return false;
    }
    link.connect().await;
    true
}

impl fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSession")
            .field("state", &self.state)
            .field("router", &self.router)
            .field("serial_link", &self.link.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::rate_limiter::RateLimiter;
    use crate::channels::sink::mocks::RecordingSink;
    use crate::channels::Channel;
    use crate::error::RoverBridgeError;
    use crate::channels::sink::MockActuatorSink;
    use crate::channels::Side;
    use crate::controller::duty::DutyCycleMapper;
    use crate::controller::event::InputEvent;
    use crate::controller::gamepad::mocks::ScriptedFinder;
    use crate::controller::router::{AxisMap, InputMode};
    use crate::indicator::mocks::RecordingIndicator;
    use crate::link::port_trait::mocks::{MockOpener, Reply};
    use std::io;
    use tempfile::TempDir;
    use tokio::time::Instant;

    fn six_channels() -> Vec<Channel> {
        (1..=6)
            .map(|id| {
                let side = if id <= 3 { Side::Left } else { Side::Right };
                Channel::new(id, side, 20.0, 40.0, 30.0)
            })
            .collect()
    }

    fn parts(
        finder: ScriptedFinder,
        sink: Box<dyn ActuatorSink>,
        link: Option<SharedLink>,
        indicator: &RecordingIndicator,
    ) -> SessionParts {
        let indicator: Arc<dyn StatusIndicator> = Arc::new(indicator.clone());
        let bank = Arc::new(ChannelBank::new(six_channels(), RateLimiter::new(1.0), sink));
        let router = InputRouter::new(
            DutyCycleMapper::default(),
            DutyCycleMapper::default(),
            AxisMap::default(),
            vec![1, 2, 3],
            vec![4, 5, 6],
            indicator.clone(),
        );
        SessionParts {
            finder: Box::new(finder),
            bank,
            link,
            router,
            indicator,
            journal: Journal::disabled(),
            device_retry: Duration::from_secs(2),
        }
    }

    fn local_session(finder: ScriptedFinder, sink: &RecordingSink) -> ControlSession {
        ControlSession::new(parts(finder, Box::new(sink.clone()), None, &RecordingIndicator::default()))
    }

    fn axis(axis: u8, value: f32) -> InputEvent {
        InputEvent::Axis { axis, value }
    }

    fn button(button: u8) -> InputEvent {
        InputEvent::ButtonDown { button }
    }

    fn assert_all_neutral(sink: &RecordingSink) {
        for id in 1..=6 {
            assert_eq!(sink.last_duty(id), Some(30.0), "channel {} not at neutral", id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_button_ends_session_at_neutral() {
        let finder = ScriptedFinder::new(vec![vec![
            InputEvent::DeviceAdded,
            axis(1, 1.0),
            button(11),
        ]]);
        let sink = RecordingSink::new();
        let mut session = local_session(finder, &sink);

        let reason = session.run().await.unwrap();

        assert_eq!(reason, ShutdownReason::ShutdownButton);
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(&sink.duties()[..3], &[(1, 29.0), (2, 29.0), (3, 29.0)]);
        assert_all_neutral(&sink);
        assert_eq!(sink.shutdowns(), 1);
        assert_eq!(sink.releases(), 1);
        assert!(session.finalizer().is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_forces_neutral_then_shuts_down() {
        let finder = ScriptedFinder::new(vec![vec![axis(1, 1.0), axis(1, 1.0), button(3)]]);
        let sink = RecordingSink::new();
        let mut session = local_session(finder, &sink);

        assert_eq!(session.run().await.unwrap(), ShutdownReason::EmergencyStop);

        let duties = sink.duties();
        // two ramp steps, then the emergency neutral pass, then the final one
        assert_eq!(duties.len(), 6 + 6 + 6);
        assert_eq!(duties[6..12], six_neutral()[..]);
        assert_eq!(sink.releases(), 1);
    }

    fn six_neutral() -> Vec<(ChannelId, f32)> {
        (1..=6).map(|id| (id, 30.0)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_cancels_device_acquisition() {
        let finder = ScriptedFinder::new(vec![]);
        let sink = RecordingSink::new();
        let mut session = local_session(finder.clone(), &sink);
        let signal = session.shutdown_signal();
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            signal.trigger();
        });
        let start = Instant::now();

        let reason = session.run().await.unwrap();

        assert_eq!(reason, ShutdownReason::Signal);
        assert!(start.elapsed() < Duration::from_secs(6));
        assert_eq!(finder.finds(), 0);
        assert_all_neutral(&sink);
        assert_eq!(sink.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_cancels_event_wait() {
        let finder = ScriptedFinder::new(vec![vec![axis(3, -1.0)]]);
        let sink = RecordingSink::new();
        let mut session = local_session(finder, &sink);
        let signal = session.shutdown_signal();
        tokio::spawn(async move {
            sleep(Duration::from_secs(30)).await;
            signal.trigger();
        });

        assert_eq!(session.run().await.unwrap(), ShutdownReason::Signal);
        assert_eq!(sink.duties()[0], (4, 29.0));
        assert_all_neutral(&sink);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_retry_waits_between_attempts() {
        let finder = ScriptedFinder::new(vec![vec![button(11)]]).failing_first(2);
        let sink = RecordingSink::new();
        let mut session = local_session(finder.clone(), &sink);
        let start = Instant::now();

        session.run().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(finder.finds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_loss_neutralizes_and_reacquires() {
        let finder = ScriptedFinder::new(vec![
            vec![button(6), axis(1, -1.0), InputEvent::DeviceRemoved],
            vec![button(11)],
        ]);
        let sink = RecordingSink::new();
        let indicator = RecordingIndicator::default();
        let mut session = ControlSession::new(parts(
            finder.clone(),
            Box::new(sink.clone()),
            None,
            &indicator,
        ));

        session.run().await.unwrap();

        assert_eq!(finder.finds(), 2);
        assert_eq!(session.router().mode(), InputMode::Duo);
        // solo drive, then the device-loss neutral pass
        let duties = sink.duties();
        assert_eq!(duties[0], (1, 31.0));
        assert_eq!(duties[6..12], six_neutral()[..]);
        assert_eq!(
            indicator.shown(),
            vec![
                Status::Waiting,
                Status::Running(InputMode::Duo),
                Status::Running(InputMode::Solo),
                Status::Waiting,
                Status::Running(InputMode::Duo),
                Status::Off,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_serial_session_connects_resets_and_tears_down() {
        let dir = TempDir::new().unwrap();
        let journal_path = dir.path().join("session.jsonl");
        let opener = MockOpener::failing(1);
        let link = SharedLink::new(CommandLink::new(
            Box::new(opener.clone()),
            LinkTiming::from(&crate::config::SerialConfig::default()),
            six_neutral(),
        ));
        let finder = ScriptedFinder::new(vec![vec![axis(1, 1.0), button(1), button(11)]]);
        let mut parts = parts(
            finder,
            Box::new(link.clone()),
            Some(link.clone()),
            &RecordingIndicator::default(),
        );
        parts.journal = Journal::open(&journal_path).unwrap();
        let mut session = ControlSession::new(parts);

        session.run().await.unwrap();

        let written = opener.written();
        assert_eq!(&written[..3], &["129", "229", "329"]);
        // reset: bank neutral pass, then the link's own neutral pass
        assert!(written[3..15].iter().all(|frame| frame.ends_with("30")));
        assert_eq!(opener.board.lock().unwrap().dtr, vec![false, true, false, true]);
        assert_eq!(link.lock().await.state(), LinkState::Disconnected);
        assert_eq!(opener.board.lock().unwrap().closed, 1);

        // Dropping the session flushes its journal.
        drop(session);
        let events: Vec<String> = std::fs::read_to_string(&journal_path)
            .unwrap()
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["event"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(
            events,
            vec!["started", "device_connected", "link_connected", "link_reset", "shutdown"]
        );
    }

    fn serial_session(opener: &MockOpener, timing: LinkTiming, script: Vec<InputEvent>) -> (ControlSession, SharedLink) {
        let link = SharedLink::new(CommandLink::new(Box::new(opener.clone()), timing, six_neutral()));
        let finder = ScriptedFinder::new(vec![script]);
        let parts = parts(finder, Box::new(link.clone()), Some(link.clone()), &RecordingIndicator::default());
        (ControlSession::new(parts), link)
    }

    fn trigger_after(session: &ControlSession, delay: Duration) {
        let signal = session.shutdown_signal();
        tokio::spawn(async move {
            sleep(delay).await;
            signal.trigger();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_cancels_send_waiting_for_ack() {
        let opener = MockOpener::new();
        opener.push_reply(Reply::Stall);
        let mut timing = LinkTiming::from(&crate::config::SerialConfig::default());
        timing.ack_timeout = Duration::from_secs(10);
        let (mut session, link) = serial_session(&opener, timing, vec![axis(1, 1.0)]);
        // Connected at 1.8s, frame 129 stalls from then on.
        trigger_after(&session, Duration::from_secs(2));
        let start = Instant::now();

        let reason = session.run().await.unwrap();

        assert_eq!(reason, ShutdownReason::Signal);
        assert!(start.elapsed() < Duration::from_secs(10), "waited out the ack timeout");
        let written = opener.written();
        assert_eq!(&written[..2], &["129", "130"]);
        assert!(written[1..].iter().all(|frame| frame.ends_with("30")));
        let board = opener.board.lock().unwrap();
        // after connect, the stale ack before the neutral pass, after the reset
        assert_eq!(board.discards, 3);
        assert_eq!(board.closed, 1);
        drop(board);
        assert_eq!(opener.opens(), 1);
        assert_eq!(link.lock().await.drops(), 0);
        assert!(session.finalizer().is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_cancels_endless_reconnect() {
        let opener = MockOpener::new();
        opener.push_write_error(io::ErrorKind::BrokenPipe);
        let timing = LinkTiming::from(&crate::config::SerialConfig::default());
        let (mut session, link) = serial_session(&opener, timing, vec![axis(1, 1.0)]);
        {
            // The board never comes back once the first port dies.
            let mut link = link.lock().await;
            link.connect().await;
            opener.failures_left.store(usize::MAX, Ordering::SeqCst);
        }
        trigger_after(&session, Duration::from_secs(31));
        let start = Instant::now();

        let reason = session.run().await.unwrap();

        assert_eq!(reason, ShutdownReason::Signal);
        assert!(start.elapsed() < Duration::from_secs(32));
        assert_eq!(opener.opens(), 1);
        assert!(opener.written().is_empty());
        let link = link.lock().await;
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.drops(), 1);
        assert_eq!(opener.board.lock().unwrap().closed, 1);
        assert!(session.finalizer().is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_drop_is_journaled() {
        let dir = TempDir::new().unwrap();
        let journal_path = dir.path().join("session.jsonl");
        let opener = MockOpener::new();
        opener.push_write_error(io::ErrorKind::BrokenPipe);
        let link = SharedLink::new(CommandLink::new(
            Box::new(opener.clone()),
            LinkTiming::from(&crate::config::SerialConfig::default()),
            six_neutral(),
        ));
        let finder = ScriptedFinder::new(vec![vec![axis(1, 1.0), button(11)]]);
        let mut parts = parts(finder, Box::new(link.clone()), Some(link), &RecordingIndicator::default());
        parts.journal = Journal::open(&journal_path).unwrap();
        let mut session = ControlSession::new(parts);

        session.run().await.unwrap();
        drop(session);

        let journal = std::fs::read_to_string(&journal_path).unwrap();
        assert!(journal.contains(r#""event":"link_lost","drops":1"#));
        // channel 1's frame was dropped, 2 and 3 went through after reconnecting
        assert_eq!(&opener.written()[..2], &["229", "329"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_error_still_finalizes() {
        let mut mock = MockActuatorSink::new();
        mock.expect_set_duty()
            .returning(|_, _| Err(RoverBridgeError::Io(io::Error::other("gpio bus"))));
        mock.expect_begin_shutdown().times(1).returning(|| ());
        mock.expect_release().times(1).returning(|| Ok(()));
        let finder = ScriptedFinder::new(vec![vec![axis(1, 1.0)]]);
        let mut session = ControlSession::new(parts(
            finder,
            Box::new(mock),
            None,
            &RecordingIndicator::default(),
        ));

        let result = session.run().await;

        assert!(matches!(result, Err(RoverBridgeError::Io(_))));
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(session.finalizer().is_done());
    }

    #[tokio::test]
    async fn test_concurrent_finalize_runs_once() {
        let sink = RecordingSink::new();
        let bank = Arc::new(ChannelBank::new(
            six_channels(),
            RateLimiter::new(1.0),
            Box::new(sink.clone()),
        ));
        bank.apply(2, 20.0).await.unwrap();
        let finalizer = Arc::new(Finalizer::new(bank.clone(), Arc::new(NullIndicator)));

        let (a, b) = (finalizer.clone(), finalizer.clone());
        tokio::join!(a.finalize(), b.finalize());

        assert_eq!(sink.shutdowns(), 1);
        assert_eq!(sink.releases(), 1);
        assert_eq!(sink.duties().len(), 1 + 6);
        assert_eq!(bank.duty(2).unwrap(), 30.0);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;
        signal.trigger();
        waiter.await.unwrap();

        assert!(signal.is_triggered());
        // Waiting after the trigger returns immediately.
        signal.wait().await;
    }

    #[test]
    fn test_session_from_default_config() {
        let config = Config::from_toml_str("").unwrap();
        let session = ControlSession::from_config(&config).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_from_config_applies_channel_table_and_solo_mapping() {
        let config = Config::from_toml_str(
            "[controller]\nsolo_mapping = \"reversed\"\n[drive]\ntrim_left = -2.0",
        )
        .unwrap();
        let session = ControlSession::from_config(&config).unwrap();

        assert_eq!(session.bank.duty(1).unwrap(), 28.0);
        assert_eq!(session.bank.duty(4).unwrap(), 30.0);
        assert!(format!("{:?}", session.router()).contains("Reversed"));
    }
}
